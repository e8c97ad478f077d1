//! Built-in provider that reads the standard `dtt_name`/`dtt_lines`
//! metadata keys, so mods can attach tooltips by writing item metadata
//! without implementing a provider themselves.

use serde_json::Value;
use tracing::debug;

use crate::error::ProviderError;
use crate::provider::{keys, priority, TooltipData, TooltipProvider};

pub const PROVIDER_ID: &str = "dynamic-tooltips:custom-data";

pub struct CustomDataTooltipProvider;

impl TooltipProvider for CustomDataTooltipProvider {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    fn priority(&self) -> i32 {
        priority::LAST
    }

    fn tooltip_data(
        &self,
        item_id: &str,
        metadata: Option<&str>,
        _locale: Option<&str>,
    ) -> Result<Option<TooltipData>, ProviderError> {
        let metadata = match metadata {
            Some(m) if !m.is_empty() => m,
            _ => return Ok(None),
        };

        // Substring pre-check avoids JSON parsing when neither key is present.
        let has_name = metadata.contains(&format!("\"{}\"", keys::CUSTOM_NAME));
        let has_lines = metadata.contains(&format!("\"{}\"", keys::CUSTOM_LINES));
        if !has_name && !has_lines {
            return Ok(None);
        }

        let doc: Value = match serde_json::from_str(metadata) {
            Ok(doc) => doc,
            Err(err) => {
                debug!("failed to parse custom tooltip metadata for {}: {}", item_id, err);
                return Ok(None);
            }
        };

        let mut hash_input = String::new();
        let mut builder = TooltipData::builder();
        let mut any = false;

        if has_name {
            if let Some(name) = doc.get(keys::CUSTOM_NAME).and_then(Value::as_str) {
                hash_input.push_str("n:");
                hash_input.push_str(name);
                builder = builder.name_override(name);
                any = true;
            }
        }

        if has_lines {
            if let Some(lines) = doc.get(keys::CUSTOM_LINES).and_then(Value::as_array) {
                for line in lines.iter().filter_map(Value::as_str) {
                    hash_input.push_str("l:");
                    hash_input.push_str(line);
                    hash_input.push(';');
                    builder = builder.add_line(line);
                    any = true;
                }
            }
        }

        if !any {
            return Ok(None);
        }

        Ok(Some(builder.hash_input(hash_input).build()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_for(metadata: &str) -> Option<TooltipData> {
        CustomDataTooltipProvider
            .tooltip_data("Sword_Iron", Some(metadata), None)
            .unwrap()
    }

    #[test]
    fn reads_name_and_lines() {
        let data = data_for(r#"{"dtt_name":"Flame Sword","dtt_lines":["Burns","+5 Fire"]}"#)
            .expect("contribution expected");
        assert_eq!(data.name_override.as_deref(), Some("Flame Sword"));
        assert_eq!(data.lines, vec!["Burns", "+5 Fire"]);
        assert!(!data.stable_hash_input.is_empty());
    }

    #[test]
    fn ignores_metadata_without_keys() {
        assert!(data_for(r#"{"durability":7}"#).is_none());
    }

    #[test]
    fn malformed_json_is_no_contribution() {
        assert!(data_for(r#"{"dtt_name": oops"#).is_none());
    }

    #[test]
    fn identical_state_yields_identical_hash_input() {
        let a = data_for(r#"{"dtt_lines":["x"]}"#).unwrap();
        let b = data_for(r#"{"dtt_lines":["x"]}"#).unwrap();
        assert_eq!(a.stable_hash_input, b.stable_hash_input);
    }
}
