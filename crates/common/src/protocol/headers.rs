use serde::{Deserialize, Deserializer};
use std::collections::HashMap;

/// Header map as carried on the wire: header name to the list of its values
pub type HeaderValues = HashMap<String, Vec<String>>;

/// A header value may arrive either as a single string or as a list of strings
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

/// Deserialize a header map, accepting `{"name": "v"}` as well as `{"name": ["v1", "v2"]}`
pub(crate) fn deserialize_header_values<'de, D>(deserializer: D) -> Result<HeaderValues, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<HashMap<String, OneOrMany>> = Option::deserialize(deserializer)?;

    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(name, values)| {
            let values = match values {
                OneOrMany::One(value) => vec![value],
                OneOrMany::Many(values) => values,
            };
            (name, values)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Holder {
        #[serde(default, deserialize_with = "deserialize_header_values")]
        headers: HeaderValues,
    }

    #[test]
    fn test_single_string_values() {
        let parsed: Holder =
            serde_json::from_str(r#"{"headers":{"content-type":"text/plain"}}"#).unwrap();
        assert_eq!(parsed.headers.get("content-type").unwrap(), &vec!["text/plain"]);
    }

    #[test]
    fn test_list_values() {
        let parsed: Holder =
            serde_json::from_str(r#"{"headers":{"set-cookie":["a=1","b=2"]}}"#).unwrap();
        assert_eq!(parsed.headers.get("set-cookie").unwrap().len(), 2);
    }

    #[test]
    fn test_mixed_and_null() {
        let parsed: Holder = serde_json::from_str(
            r#"{"headers":{"x-one":"1","x-many":["2","3"]}}"#,
        )
        .unwrap();
        assert_eq!(parsed.headers.len(), 2);

        let parsed: Holder = serde_json::from_str(r#"{"headers":null}"#).unwrap();
        assert!(parsed.headers.is_empty());

        let parsed: Holder = serde_json::from_str(r#"{}"#).unwrap();
        assert!(parsed.headers.is_empty());
    }

    #[test]
    fn test_invalid_value_rejected() {
        let parsed = serde_json::from_str::<Holder>(r#"{"headers":{"x-num":42}}"#);
        assert!(parsed.is_err());
    }
}
