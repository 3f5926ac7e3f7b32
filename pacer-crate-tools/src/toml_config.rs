use anyhow::Context;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

/// 从 TOML 文件加载配置
pub fn load_toml<T: DeserializeOwned>(path: impl AsRef<Path>) -> anyhow::Result<T> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).with_context(|| format!("failed to read config file: {:?}", path))?;

    parse_toml(&content).with_context(|| format!("failed to parse config file: {:?}", path))
}

/// 从字符串解析配置
pub fn parse_toml<T: DeserializeOwned>(content: &str) -> anyhow::Result<T> {
    let value = toml::from_str(content)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        #[serde(default)]
        count: u32,
    }

    #[test]
    fn test_load_toml_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name = \"demo\"\ncount = 3").unwrap();

        let sample: Sample = load_toml(file.path()).unwrap();
        assert_eq!(
            sample,
            Sample {
                name: "demo".to_string(),
                count: 3
            }
        );
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = load_toml::<Sample>("/definitely/not/here.toml").unwrap_err();
        assert!(format!("{err:#}").contains("not/here.toml"));
    }
}
