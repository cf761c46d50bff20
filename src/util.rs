//! Shared utility functions for the storyforge crate.

/// The last `max` bytes of `text`, moved forward to a char boundary.
pub fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// The last `n` non-empty lines of `text`.
pub fn last_lines(text: &str, n: usize) -> Vec<String> {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let skip = lines.len().saturating_sub(n);
    lines[skip..].iter().map(|l| l.trim_end().to_string()).collect()
}

/// Serialize a `Duration` as whole milliseconds.
pub mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[test]
    fn test_tail_respects_char_boundaries() {
        assert_eq!(tail("abc", 10), "abc");
        assert_eq!(tail("héllo", 3), "llo");
        assert_eq!(tail("héllo", 4), "llo");
    }

    #[test]
    fn test_last_lines_skips_blank_lines() {
        let text = "one\n\ntwo\nthree\n   \n";
        assert_eq!(last_lines(text, 2), vec!["two", "three"]);
        assert_eq!(last_lines(text, 10), vec!["one", "two", "three"]);
    }

    #[derive(Serialize, Deserialize)]
    struct Timed {
        #[serde(with = "duration_serde")]
        took: Duration,
    }

    #[test]
    fn test_duration_serde_uses_millis() {
        let json = serde_json::to_string(&Timed {
            took: Duration::from_millis(1500),
        })
        .unwrap();
        assert_eq!(json, r#"{"took":1500}"#);
        let back: Timed = serde_json::from_str(&json).unwrap();
        assert_eq!(back.took, Duration::from_millis(1500));
    }
}
