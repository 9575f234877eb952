//! GitHub Actions provenance: in-toto v1 statement with a SLSA v1 predicate.

use serde_json::json;

use super::{CiEnvironment, Statement, Subject, INTOTO_STATEMENT_V1_TYPE, SLSA_PREDICATE_V1_TYPE};

pub(crate) const REQUIRED_ENV_VAR: &str = "ACTIONS_ID_TOKEN_REQUEST_URL";

pub(crate) const MISSING_TOKEN_MESSAGE: &str =
    "Provenance generation in GitHub Actions requires \"write\" access to the \"id-token\" permission";

const BUILDER_ID_PREFIX: &str = "https://github.com/actions/runner";
const BUILD_TYPE: &str = "https://slsa-framework.github.io/github-actions-buildtypes/workflow/v1";

/// Split `GITHUB_WORKFLOW_REF` (`owner/repo/.github/workflows/x.yml@refs/heads/main`)
/// into the repository-relative workflow path and its ref.
fn workflow_path_and_ref(env: &CiEnvironment) -> (String, String) {
    let full = env.var("GITHUB_WORKFLOW_REF");
    let relative = match env.get("GITHUB_REPOSITORY") {
        Some(repo) => full.replacen(&format!("{repo}/"), "", 1),
        None => full.to_string(),
    };

    match relative.split_once('@') {
        Some((path, r#ref)) => (path.to_string(), r#ref.to_string()),
        None => (relative, String::new()),
    }
}

pub(crate) fn statement(subjects: Vec<Subject>, env: &CiEnvironment) -> Statement {
    let (workflow_path, workflow_ref) = workflow_path_and_ref(env);
    let server = env.var("GITHUB_SERVER_URL");
    let repository = env.var("GITHUB_REPOSITORY");

    let predicate = json!({
        "buildDefinition": {
            "buildType": BUILD_TYPE,
            "externalParameters": {
                "workflow": {
                    "ref": workflow_ref,
                    "repository": format!("{server}/{repository}"),
                    "path": workflow_path,
                }
            },
            "internalParameters": {
                "github": {
                    "event_name": env.json("GITHUB_EVENT_NAME"),
                    "repository_id": env.json("GITHUB_REPOSITORY_ID"),
                    "repository_owner_id": env.json("GITHUB_REPOSITORY_OWNER_ID"),
                }
            },
            "resolvedDependencies": [{
                "uri": format!("git+{server}/{repository}@{}", env.var("GITHUB_REF")),
                "digest": { "gitCommit": env.json("GITHUB_SHA") }
            }]
        },
        "runDetails": {
            "builder": {
                "id": format!("{BUILDER_ID_PREFIX}/{}", env.var("RUNNER_ENVIRONMENT"))
            },
            "metadata": {
                "invocationId": format!(
                    "{server}/{repository}/actions/runs/{}/attempts/{}",
                    env.var("GITHUB_RUN_ID"),
                    env.var("GITHUB_RUN_ATTEMPT"),
                )
            }
        }
    });

    Statement {
        statement_type: INTOTO_STATEMENT_V1_TYPE.to_string(),
        subject: subjects,
        predicate_type: SLSA_PREDICATE_V1_TYPE.to_string(),
        predicate,
    }
}
