//! Stream definitions published by the logjam control plane.

use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An error parsing an [`AppEnv`].
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum AppEnvError {
    /// The string contains no `-` separating application and environment.
    #[error("missing '-' between app and env")]
    MissingSeparator,
    /// Either the application or the environment part is empty.
    #[error("app and env must not be empty")]
    EmptyPart,
}

/// Identity of an application in a deployment environment, written as `<app>-<env>`.
///
/// The environment is the part after the last `-`, so applications may contain dashes.
#[derive(Clone, Debug)]
pub struct AppEnv {
    name: String,
    split: usize,
}

impl AppEnv {
    /// Creates an `AppEnv` from its two parts.
    pub fn new(app: &str, env: &str) -> Result<Self, AppEnvError> {
        if app.is_empty() || env.is_empty() {
            return Err(AppEnvError::EmptyPart);
        }

        Ok(Self {
            name: format!("{app}-{env}"),
            split: app.len(),
        })
    }

    /// Returns the application name.
    pub fn app(&self) -> &str {
        &self.name[..self.split]
    }

    /// Returns the environment name.
    pub fn env(&self) -> &str {
        &self.name[self.split + 1..]
    }

    /// Returns the canonical `<app>-<env>` string.
    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl FromStr for AppEnv {
    type Err = AppEnvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (app, env) = s.rsplit_once('-').ok_or(AppEnvError::MissingSeparator)?;
        Self::new(app, env)
    }
}

impl fmt::Display for AppEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// Comparisons only look at `name`, so that hashing agrees with `Borrow<str>`.
impl PartialEq for AppEnv {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for AppEnv {}

impl PartialOrd for AppEnv {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AppEnv {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name.cmp(&other.name)
    }
}

impl Hash for AppEnv {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl Borrow<str> for AppEnv {
    fn borrow(&self) -> &str {
        &self.name
    }
}

impl Serialize for AppEnv {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name)
    }
}

impl<'de> Deserialize<'de> for AppEnv {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <std::borrow::Cow<'_, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Resource names that are exported as separate families.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Resources {
    /// Sub-timings exported as summaries, e.g. `db_time`.
    pub time_resources: BTreeSet<String>,
    /// Sub-counters exported as totals, e.g. `db_calls`.
    pub call_resources: BTreeSet<String>,
}

impl Resources {
    /// Returns the union of both resource sets.
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            time_resources: self.time_resources.union(&other.time_resources).cloned().collect(),
            call_resources: self.call_resources.union(&other.call_resources).cloned().collect(),
        }
    }

    /// Returns `true` if no resources are declared.
    pub fn is_empty(&self) -> bool {
        self.time_resources.is_empty() && self.call_resources.is_empty()
    }
}

/// Configuration of a single logjam stream.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamDefinition {
    /// Application name.
    pub app: String,
    /// Environment name.
    pub env: String,
    /// Requests whose URI starts with this prefix are not recorded.
    pub ignored_request_uri: Option<String>,
    /// Comma separated action prefixes only recorded from the backend, or `*` for all.
    pub backend_only_requests: String,
    /// Top level modules of API actions. A leading empty string marks every request as API.
    pub api_requests: Vec<String>,
    /// Sub-timings declared by this stream.
    #[serde(flatten)]
    pub resources: Resources,
}

impl StreamDefinition {
    /// Returns the identity of this stream.
    pub fn app_env(&self) -> Result<AppEnv, AppEnvError> {
        AppEnv::new(&self.app, &self.env)
    }

    /// Returns `true` if requests to `uri` are not recorded.
    pub fn is_ignored_request(&self, uri: &str) -> bool {
        match self.ignored_request_uri.as_deref() {
            Some(prefix) if !prefix.is_empty() => uri.starts_with(prefix),
            _ => false,
        }
    }

    /// Returns `true` if `action` is only recorded from backend request logs.
    pub fn is_backend_only(&self, action: &str) -> bool {
        let prefixes = self.backend_only_requests.as_str();
        if prefixes == "*" {
            return true;
        }

        prefixes
            .split(',')
            .filter(|prefix| !prefix.is_empty())
            .any(|prefix| action.starts_with(prefix))
    }

    /// Returns `true` if `action` belongs to an API module.
    ///
    /// The module is the first namespace of the action, e.g. `Api` for `Api::UsersController#show`.
    pub fn is_api_request(&self, action: &str) -> bool {
        match self.api_requests.first() {
            None => return false,
            Some(first) if first.is_empty() => return true,
            Some(_) => {}
        }

        let action = action.trim_start_matches(':');
        let end = action.find([':', '#']).unwrap_or(action.len());
        let module = &action[..end];

        self.api_requests.iter().any(|m| m == module)
    }
}

/// Selects the streams this exporter is responsible for.
///
/// Built from a comma separated list of environments; an empty list accepts every stream.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StreamFilter {
    envs: BTreeSet<String>,
}

impl StreamFilter {
    /// Parses a comma separated environment list.
    pub fn new(envs: &str) -> Self {
        Self {
            envs: envs
                .split(',')
                .map(str::trim)
                .filter(|env| !env.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }

    /// Returns `true` if the stream for `app_env` should be processed.
    pub fn matches(&self, app_env: &AppEnv) -> bool {
        self.envs.is_empty() || self.envs.contains(app_env.env())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_app_env() {
        let app_env: AppEnv = "my-app-production".parse().unwrap();
        assert_eq!(app_env.app(), "my-app");
        assert_eq!(app_env.env(), "production");
        assert_eq!(app_env.as_str(), "my-app-production");

        assert_eq!("logjam".parse::<AppEnv>(), Err(AppEnvError::MissingSeparator));
        assert_eq!("logjam-".parse::<AppEnv>(), Err(AppEnvError::EmptyPart));
        assert_eq!("-production".parse::<AppEnv>(), Err(AppEnvError::EmptyPart));
    }

    #[test]
    fn test_app_env_borrowed_lookup() {
        let mut map = hashbrown::HashMap::new();
        map.insert(AppEnv::new("shop", "preview").unwrap(), 1);
        assert_eq!(map.get("shop-preview"), Some(&1));
        assert_eq!(map.get("shop-production"), None);
    }

    #[test]
    fn test_deserialize_stream() {
        let json = r#"{
            "app": "shop",
            "env": "production",
            "ignored_request_uri": "/_system",
            "backend_only_requests": "Admin,Internal::",
            "api_requests": ["Api", "Rest"],
            "time_resources": ["db_time", "view_time"],
            "call_resources": ["db_calls"],
            "database_number": 3
        }"#;

        let stream: StreamDefinition = serde_json::from_str(json).unwrap();
        insta::assert_debug_snapshot!(stream, @r#"
        StreamDefinition {
            app: "shop",
            env: "production",
            ignored_request_uri: Some(
                "/_system",
            ),
            backend_only_requests: "Admin,Internal::",
            api_requests: [
                "Api",
                "Rest",
            ],
            resources: Resources {
                time_resources: {
                    "db_time",
                    "view_time",
                },
                call_resources: {
                    "db_calls",
                },
            },
        }
        "#);
        assert_eq!(stream.app_env().unwrap().as_str(), "shop-production");
    }

    #[test]
    fn test_request_classification() {
        let stream = StreamDefinition {
            app: "shop".to_owned(),
            env: "production".to_owned(),
            ignored_request_uri: Some("/_system".to_owned()),
            backend_only_requests: "Admin,Internal::".to_owned(),
            api_requests: vec!["Api".to_owned()],
            ..Default::default()
        };

        assert!(stream.is_ignored_request("/_system/alive"));
        assert!(!stream.is_ignored_request("/products"));

        assert!(stream.is_backend_only("AdminController#index"));
        assert!(stream.is_backend_only("Internal::StatsController#show"));
        assert!(!stream.is_backend_only("ProductsController#index"));

        assert!(stream.is_api_request("Api::UsersController#show"));
        assert!(stream.is_api_request("::Api::UsersController#show"));
        assert!(!stream.is_api_request("ApiDocsController#index"));
    }

    #[test]
    fn test_all_requests() {
        let stream = StreamDefinition {
            backend_only_requests: "*".to_owned(),
            api_requests: vec![String::new()],
            ..Default::default()
        };

        assert!(stream.is_backend_only("ProductsController#index"));
        assert!(stream.is_api_request("ProductsController#index"));
        assert!(!StreamDefinition::default().is_api_request("Api::UsersController#show"));
        assert!(!StreamDefinition::default().is_ignored_request("/"));
    }

    #[test]
    fn test_stream_filter() {
        let app_env = AppEnv::new("shop", "production").unwrap();

        assert!(StreamFilter::new("").matches(&app_env));
        assert!(StreamFilter::new("preview, production").matches(&app_env));
        assert!(!StreamFilter::new("preview").matches(&app_env));
    }

    #[test]
    fn test_merge_resources() {
        let global = Resources {
            time_resources: ["db_time".to_owned()].into(),
            call_resources: ["db_calls".to_owned()].into(),
        };
        let local = Resources {
            time_resources: ["view_time".to_owned()].into(),
            call_resources: ["db_calls".to_owned()].into(),
        };

        let merged = global.merge(&local);
        assert_eq!(merged.time_resources.len(), 2);
        assert_eq!(merged.call_resources.len(), 1);
        assert!(!merged.is_empty());
        assert!(Resources::default().is_empty());
    }
}
