//! Configuration loading: reads a pipeline config file (YAML or JSON,
//! dispatched on file extension), strips `//`-style comment lines, and
//! parses it into the generic pipeline-of-stages shape.
use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;

/// Top-level configuration: a global log level and an ordered pipeline of
/// stage configurations.
#[derive(Debug, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub loglevel: Option<String>,
    pub pipeline: Vec<RawStageConfig>,
}

/// One `pipeline:` list entry. `options` holds everything besides `module`
/// and `loglevel`, to be deserialized by the stage's own option struct.
#[derive(Debug, Deserialize)]
pub struct RawStageConfig {
    pub module: String,
    #[serde(default)]
    pub loglevel: Option<String>,
    #[serde(flatten)]
    pub options: serde_json::Value,
}

fn strip_comments(source: &str) -> String {
    static COMMENT_RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = COMMENT_RE.get_or_init(|| regex::Regex::new(r"//\s+.*$").expect("valid regex"));
    source
        .lines()
        .map(|line| re.replace(line, "").into_owned())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Loads and parses a configuration file from `path`.
pub fn load_config(path: &Path) -> Result<RawConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::new(path.display().to_string(), format!("cannot read file: {e}"))
    })?;
    let stripped = strip_comments(&text);

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    );

    if is_yaml {
        serde_yaml::from_str(&stripped)
            .map_err(|e| ConfigError::new(path.display().to_string(), e.to_string()))
    } else {
        serde_json::from_str(&stripped)
            .map_err(|e| ConfigError::new(path.display().to_string(), e.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn strips_double_slash_comments() {
        let src = "a: 1 // this is a comment\nb: 2\n";
        let stripped = strip_comments(src);
        assert_eq!(stripped, "a: 1\nb: 2\n".trim_end());
    }

    #[test]
    fn loads_json_config() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"loglevel": "info", "pipeline": [{{"module": "Historical", "expression": "a.*.b"}}]}}"#
        )
        .unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.loglevel.as_deref(), Some("info"));
        assert_eq!(config.pipeline.len(), 1);
        assert_eq!(config.pipeline.first().unwrap().module, "Historical");
    }

    #[test]
    fn loads_yaml_config() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        write!(
            file,
            "loglevel: debug\npipeline:\n  - module: AggSum\n    expression: a.(*).b\n    timeout: 60\n"
        )
        .unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.loglevel.as_deref(), Some("debug"));
        assert_eq!(config.pipeline.first().unwrap().module, "AggSum");
    }

    #[test]
    fn rejects_malformed_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(load_config(file.path()).is_err());
    }
}
