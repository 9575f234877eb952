//! CI provider detection.

use std::collections::BTreeMap;
use std::ffi::OsString;

use crate::error::{PublishError, PublishResult};

use super::{github, gitlab, Statement, Subject};

/// Snapshot of the CI environment.
///
/// Builders only ever read this snapshot, never the live process
/// environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CiEnvironment {
    vars: BTreeMap<String, String>,
}

impl CiEnvironment {
    /// Capture the current process environment.
    ///
    /// Variables whose name or value is not valid Unicode are skipped.
    pub fn from_process_env() -> Self {
        Self::from_os_vars(std::env::vars_os())
    }

    fn from_os_vars(vars: impl IntoIterator<Item = (OsString, OsString)>) -> Self {
        vars.into_iter()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }

    /// Add a variable (builder style).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Value of a variable; empty values count as unset.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Value of a variable, or `""` when unset.
    pub(crate) fn var(&self, key: &str) -> &str {
        self.get(key).unwrap_or_default()
    }

    /// Variable as a JSON string, `null` when unset.
    pub(crate) fn json(&self, key: &str) -> serde_json::Value {
        self.get(key)
            .map(|v| serde_json::Value::String(v.to_string()))
            .unwrap_or(serde_json::Value::Null)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CiEnvironment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// CI providers that provenance can be generated on.
///
/// Each supported variant owns its statement builder and the environment
/// variable that proves an identity token can be requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CiProvider {
    GitHubActions,
    GitLab,
    /// Any other (or no) CI, with a display name.
    Unsupported(String),
}

/// Non-supported CIs we can at least name in errors.
const KNOWN_UNSUPPORTED: &[(&str, &str)] = &[
    ("CIRCLECI", "CircleCI"),
    ("TRAVIS", "Travis CI"),
    ("JENKINS_URL", "Jenkins"),
    ("BUILDKITE", "Buildkite"),
    ("TF_BUILD", "Azure Pipelines"),
    ("BITBUCKET_BUILD_NUMBER", "Bitbucket Pipelines"),
];

impl CiProvider {
    pub fn detect(env: &CiEnvironment) -> Self {
        if env.get("GITHUB_ACTIONS").is_some() {
            return Self::GitHubActions;
        }
        if env.get("GITLAB_CI").is_some() {
            return Self::GitLab;
        }
        let name = KNOWN_UNSUPPORTED
            .iter()
            .find(|(var, _)| env.get(var).is_some())
            .map(|(_, name)| name.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Self::Unsupported(name)
    }

    pub fn name(&self) -> &str {
        match self {
            Self::GitHubActions => "GitHub Actions",
            Self::GitLab => "GitLab CI",
            Self::Unsupported(name) => name,
        }
    }

    /// Variable that must be set for the identity token to be obtainable.
    pub fn required_env_var(&self) -> Option<&'static str> {
        match self {
            Self::GitHubActions => Some(github::REQUIRED_ENV_VAR),
            Self::GitLab => Some(gitlab::REQUIRED_ENV_VAR),
            Self::Unsupported(_) => None,
        }
    }

    fn missing_token_message(&self) -> String {
        match self {
            Self::GitHubActions => github::MISSING_TOKEN_MESSAGE.to_string(),
            Self::GitLab => gitlab::MISSING_TOKEN_MESSAGE.to_string(),
            Self::Unsupported(name) => {
                format!("Automatic provenance generation not supported for provider: {name}")
            }
        }
    }

    pub(crate) fn ensure_identity_token(&self, env: &CiEnvironment) -> PublishResult<()> {
        match self.required_env_var() {
            Some(var) if env.get(var).is_some() => Ok(()),
            _ => Err(PublishError::provenance(self.missing_token_message())),
        }
    }

    pub(crate) fn statement(
        &self,
        subjects: Vec<Subject>,
        env: &CiEnvironment,
    ) -> PublishResult<Statement> {
        match self {
            Self::GitHubActions => Ok(github::statement(subjects, env)),
            Self::GitLab => Ok(gitlab::statement(subjects, env)),
            Self::Unsupported(_) => Err(PublishError::provenance(self.missing_token_message())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_detect() {
        let gh = CiEnvironment::default().with("GITHUB_ACTIONS", "true");
        assert_eq!(CiProvider::detect(&gh), CiProvider::GitHubActions);

        let gl = CiEnvironment::default().with("GITLAB_CI", "true");
        assert_eq!(CiProvider::detect(&gl), CiProvider::GitLab);

        let circle = CiEnvironment::default().with("CIRCLECI", "true");
        assert_eq!(
            CiProvider::detect(&circle),
            CiProvider::Unsupported("CircleCI".into())
        );

        assert_eq!(
            CiProvider::detect(&CiEnvironment::default()),
            CiProvider::Unsupported("unknown".into())
        );
    }

    #[test]
    fn test_github_requires_id_token_permission() {
        let env = CiEnvironment::default().with("GITHUB_ACTIONS", "true");
        let err = CiProvider::GitHubActions
            .ensure_identity_token(&env)
            .unwrap_err();
        assert!(err.to_string().contains("\"id-token\" permission"));

        let env = env.with("ACTIONS_ID_TOKEN_REQUEST_URL", "https://token.example");
        assert!(CiProvider::GitHubActions.ensure_identity_token(&env).is_ok());
    }

    #[test]
    fn test_gitlab_requires_sigstore_token() {
        let env = CiEnvironment::default().with("GITLAB_CI", "true");
        let err = CiProvider::GitLab.ensure_identity_token(&env).unwrap_err();
        assert!(err.to_string().contains("SIGSTORE_ID_TOKEN"));
    }

    #[test]
    fn test_unsupported_provider() {
        let provider = CiProvider::Unsupported("Jenkins".into());
        let err = provider
            .ensure_identity_token(&CiEnvironment::default())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Automatic provenance generation not supported for provider: Jenkins"
        );
        assert!(provider
            .statement(Vec::new(), &CiEnvironment::default())
            .is_err());
    }

    #[test]
    #[serial]
    fn test_from_process_env() {
        std::env::set_var("BNP_CI_SNAPSHOT_TEST", "yes");
        let env = CiEnvironment::from_process_env();
        std::env::remove_var("BNP_CI_SNAPSHOT_TEST");

        assert_eq!(env.get("BNP_CI_SNAPSHOT_TEST"), Some("yes"));
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn test_from_process_env_skips_non_unicode() {
        use std::os::unix::ffi::OsStringExt;

        let bad = OsString::from_vec(vec![0xff, 0xfe]);
        std::env::set_var("BNP_CI_NON_UNICODE", &bad);
        std::env::set_var("BNP_CI_SNAPSHOT_TEST", "yes");
        let env = CiEnvironment::from_process_env();
        std::env::remove_var("BNP_CI_NON_UNICODE");
        std::env::remove_var("BNP_CI_SNAPSHOT_TEST");

        assert_eq!(env.get("BNP_CI_NON_UNICODE"), None);
        assert_eq!(env.get("BNP_CI_SNAPSHOT_TEST"), Some("yes"));
    }

    #[cfg(unix)]
    #[test]
    fn test_from_os_vars_skips_invalid_names() {
        use std::os::unix::ffi::OsStringExt;

        let env = CiEnvironment::from_os_vars([
            (OsString::from_vec(vec![0xc3, 0x28]), OsString::from("x")),
            (OsString::from("GITLAB_CI"), OsString::from("true")),
        ]);
        assert_eq!(env.iter().count(), 1);
        assert_eq!(env.get("GITLAB_CI"), Some("true"));
    }
}
