use crate::models::{telemetry_entry::NO_MESSAGE, Properties, TelemetryEntry};
use tracing::debug;

const MAX_TEXT_LEN: usize = 32768;
const MAX_URL_LEN: usize = 2048;
const MAX_METHOD_LEN: usize = 16;
const MAX_SOURCE_CONTEXT_LEN: usize = 1024;
const MAX_PROPERTY_KEY_LEN: usize = 150;
const MAX_PROPERTY_VALUE_LEN: usize = 8192;

pub(crate) trait Sanitize {
    fn sanitize(&mut self);
}

impl Sanitize for TelemetryEntry {
    fn sanitize(&mut self) {
        if self.message.trim().is_empty() {
            self.message = NO_MESSAGE.into();
        }
        truncate_chars(&mut self.message, MAX_TEXT_LEN);
        truncate_opt(&mut self.exception_message, MAX_TEXT_LEN);
        truncate_opt(&mut self.stack_trace, MAX_TEXT_LEN);
        truncate_opt(&mut self.source_context, MAX_SOURCE_CONTEXT_LEN);
        truncate_opt(&mut self.request_url, MAX_URL_LEN);
        truncate_opt(&mut self.request_method, MAX_METHOD_LEN);
        if let Some(context) = self.additional_context.as_mut() {
            context.sanitize();
        }
    }
}

impl Sanitize for Properties {
    fn sanitize(&mut self) {
        let long_keys: Vec<_> = self
            .keys()
            .filter(|k| k.chars().count() > MAX_PROPERTY_KEY_LEN)
            .map(|k| k.to_owned())
            .collect();
        for long_key in long_keys {
            if let Some((mut key, value)) = self.remove_entry(&long_key) {
                truncate_chars(&mut key, MAX_PROPERTY_KEY_LEN);
                if self.insert(key, value).is_some() {
                    debug!(
                        "Truncated property name overrides property with the same name: {}",
                        long_key
                    );
                }
            }
        }
        for value in self.values_mut() {
            truncate_chars(value, MAX_PROPERTY_VALUE_LEN);
        }
    }
}

fn truncate_opt(value: &mut Option<String>, max_chars: usize) {
    if let Some(value) = value.as_mut() {
        truncate_chars(value, max_chars);
    }
}

/// Truncate to at most `max_chars` characters without splitting a code point.
fn truncate_chars(value: &mut String, max_chars: usize) {
    if let Some((idx, _)) = value.char_indices().nth(max_chars) {
        value.truncate(idx);
    }
}
