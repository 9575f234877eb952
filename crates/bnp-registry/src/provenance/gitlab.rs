//! GitLab CI provenance: in-toto v0.1 statement with a SLSA v0.2 predicate.

use serde_json::{json, Map, Value};

use super::{CiEnvironment, Statement, Subject, INTOTO_STATEMENT_V01_TYPE, SLSA_PREDICATE_V02_TYPE};

pub(crate) const REQUIRED_ENV_VAR: &str = "SIGSTORE_ID_TOKEN";

pub(crate) const MISSING_TOKEN_MESSAGE: &str = "Provenance generation in GitLab CI requires \"SIGSTORE_ID_TOKEN\" with \"sigstore\" audience to be present in \"id_tokens\". For more info see:\nhttps://docs.gitlab.com/ee/ci/secrets/id_token_authentication.html";

const BUILD_TYPE_PREFIX: &str = "https://github.com/npm/cli/gitlab";
const BUILD_TYPE_VERSION: &str = "v0alpha1";

/// Substrings that keep a variable out of the recorded parameters.
const SECRET_MARKERS: &[&str] = &["TOKEN", "PASSWORD", "SECRET", "PRIVATE", "KEY"];

/// Pipeline variables recorded as build parameters.
///
/// Only `CI_*`/`GITLAB_*` variables are kept, minus anything that looks like
/// a credential (the statement ends up in a public log).
fn parameters(env: &CiEnvironment) -> Value {
    let params: Map<String, Value> = env
        .iter()
        .filter(|(k, _)| k.starts_with("CI_") || k.starts_with("GITLAB_") || *k == "CI")
        .filter(|(k, _)| !SECRET_MARKERS.iter().any(|m| k.contains(m)))
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect();
    Value::Object(params)
}

pub(crate) fn statement(subjects: Vec<Subject>, env: &CiEnvironment) -> Statement {
    let project_url = env.var("CI_PROJECT_URL");
    let source = json!({
        "uri": format!("git+{project_url}"),
        "digest": { "sha1": env.json("CI_COMMIT_SHA") },
    });

    let mut config_source = source.clone();
    config_source["entryPoint"] = env.json("CI_JOB_NAME");

    let predicate = json!({
        "buildType": format!("{BUILD_TYPE_PREFIX}/{BUILD_TYPE_VERSION}"),
        "builder": {
            "id": format!("{project_url}/-/runners/{}", env.var("CI_RUNNER_ID"))
        },
        "invocation": {
            "configSource": config_source,
            "parameters": parameters(env),
            "environment": {
                "name": env.json("CI_RUNNER_DESCRIPTION"),
                "architecture": env.json("CI_RUNNER_EXECUTABLE_ARCH"),
                "server": env.json("CI_SERVER_URL"),
                "project": env.json("CI_PROJECT_PATH"),
                "job": { "id": env.json("CI_JOB_ID") },
                "pipeline": {
                    "id": env.json("CI_PIPELINE_ID"),
                    "ref": env.json("CI_CONFIG_PATH"),
                }
            }
        },
        "metadata": {
            "buildInvocationId": env.var("CI_JOB_URL"),
            "completeness": {
                "parameters": true,
                "environment": true,
                "materials": false,
            },
            "reproducible": false,
        },
        "materials": [source],
    });

    Statement {
        statement_type: INTOTO_STATEMENT_V01_TYPE.to_string(),
        subject: subjects,
        predicate_type: SLSA_PREDICATE_V02_TYPE.to_string(),
        predicate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gitlab_env() -> CiEnvironment {
        CiEnvironment::default()
            .with("CI", "true")
            .with("GITLAB_CI", "true")
            .with("CI_PROJECT_URL", "https://gitlab.com/acme/widget")
            .with("CI_RUNNER_ID", "7")
            .with("CI_COMMIT_SHA", "cafebabe")
            .with("CI_JOB_NAME", "publish")
            .with("CI_JOB_ID", "900")
            .with("CI_JOB_URL", "https://gitlab.com/acme/widget/-/jobs/900")
            .with("CI_PIPELINE_ID", "55")
            .with("CI_CONFIG_PATH", ".gitlab-ci.yml")
            .with("CI_JOB_TOKEN", "super-secret")
            .with("SIGSTORE_ID_TOKEN", "jwt")
            .with("HOME", "/root")
    }

    #[test]
    fn test_statement_shape() {
        let statement = statement(Vec::new(), &gitlab_env());
        let p = &statement.predicate;

        assert_eq!(statement.statement_type, INTOTO_STATEMENT_V01_TYPE);
        assert_eq!(statement.predicate_type, SLSA_PREDICATE_V02_TYPE);
        assert_eq!(p["buildType"], "https://github.com/npm/cli/gitlab/v0alpha1");
        assert_eq!(p["builder"]["id"], "https://gitlab.com/acme/widget/-/runners/7");
        assert_eq!(
            p["invocation"]["configSource"]["uri"],
            "git+https://gitlab.com/acme/widget"
        );
        assert_eq!(p["invocation"]["configSource"]["digest"]["sha1"], "cafebabe");
        assert_eq!(p["invocation"]["configSource"]["entryPoint"], "publish");
        assert_eq!(p["invocation"]["environment"]["job"]["id"], "900");
        assert_eq!(p["invocation"]["environment"]["pipeline"]["ref"], ".gitlab-ci.yml");
        assert_eq!(
            p["metadata"]["buildInvocationId"],
            "https://gitlab.com/acme/widget/-/jobs/900"
        );
        assert_eq!(p["metadata"]["completeness"]["materials"], false);
        assert_eq!(p["materials"][0]["digest"]["sha1"], "cafebabe");
        assert!(p["materials"][0].get("entryPoint").is_none());
    }

    #[test]
    fn test_parameters_exclude_secrets() {
        let params = parameters(&gitlab_env());
        assert_eq!(params["CI_JOB_NAME"], "publish");
        assert_eq!(params["CI"], "true");
        assert!(params.get("CI_JOB_TOKEN").is_none());
        assert!(params.get("SIGSTORE_ID_TOKEN").is_none());
        assert!(params.get("HOME").is_none());
    }
}
