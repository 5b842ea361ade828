use serde::de::DeserializeOwned;
use serde::Serialize;

pub fn from_yaml<T: DeserializeOwned>(yaml: &str) -> anyhow::Result<T> {
    let value = serde_yml::from_str::<T>(yaml)?;
    Ok(value)
}

pub fn to_yaml<T: Serialize>(value: &T) -> anyhow::Result<String> {
    let yaml = serde_yml::to_string(value)?;
    Ok(yaml.replace("\r\n", "\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Limits {
        min_iterations: usize,
        max_iterations: usize,
        threshold: f64,
    }

    #[test]
    fn yaml_round_trip_keeps_values() {
        let limits = Limits {
            min_iterations: 0,
            max_iterations: 20,
            threshold: 1e-6,
        };
        let yaml = to_yaml(&limits).unwrap();
        let back: Limits = from_yaml(&yaml).unwrap();
        assert_eq!(back, limits);
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let result = from_yaml::<Limits>("min_iterations: [1, 2");
        assert!(result.is_err());
    }
}
