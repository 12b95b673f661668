//! Types shared by the workflow custom resources

use schemars::JsonSchema;
use scm::Provider;
use serde::{Deserialize, Deserializer, Serialize};

/// Reference to a git repository
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct GitRepository {
    /// Clone URL (HTTPS or scp-style)
    pub url: String,

    /// Branch to work on; the repository default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Git host kind; detected from the URL when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub provider: Option<Provider>,
}

impl GitRepository {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Explicit provider, else detected from the URL host
    #[must_use]
    pub fn provider(&self) -> Option<Provider> {
        self.provider
            .or_else(|| scm::RepoRef::parse(&self.url).ok().map(|r| r.provider))
    }
}

/// Accept a JSON number written either as an integer or as an integral float.
///
/// Objects that passed through untyped clients frequently come back with
/// `123.0` where `123` was written.
pub(crate) fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;

    let value = serde_json::Value::deserialize(deserializer)?;
    match &value {
        serde_json::Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                return Ok(v);
            }
            match n.as_f64() {
                Some(f) if f >= 0.0 && f.fract() == 0.0 && f < u64::MAX as f64 => Ok(f as u64),
                _ => Err(D::Error::custom(format!(
                    "expected a non-negative whole number, got {n}"
                ))),
            }
        }
        other => Err(D::Error::custom(format!("expected a number, got {other}"))),
    }
}
