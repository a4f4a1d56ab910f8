use std::str::FromStr;

use log::{debug, warn};
use strum_macros::{Display, EnumString};

/// Keys recognized in `-- @ key: value` hint comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum HintKey {
    Parallel,
    BatchSize,
}

/// Evaluation settings collected from hint comments. Unset fields fall back to the next
/// level out (stage, then pipeline block, then caller options).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hints {
    pub parallel: Option<usize>,
    pub batch_size: Option<usize>,
}

impl Hints {
    pub fn from_comments<'a>(comments: impl IntoIterator<Item = &'a str>) -> Self {
        let mut hints = Hints::default();
        for comment in comments {
            hints.apply_comment(comment);
        }
        hints
    }

    /// Applies one line comment if it is a hint; anything else is ignored.
    pub fn apply_comment(&mut self, comment: &str) {
        let Some(body) = comment.strip_prefix("--") else {
            return;
        };
        let Some(hint) = body.trim_start().strip_prefix('@') else {
            return;
        };
        let Some((key, value)) = hint.split_once(':') else {
            debug!("ignoring hint without a value: {}", comment.trim());
            return;
        };
        let key = match HintKey::from_str(key.trim()) {
            Ok(key) => key,
            Err(_) => {
                debug!("ignoring unrecognized hint: {}", key.trim());
                return;
            }
        };
        let value = match value.trim().parse::<usize>() {
            Ok(0) => {
                warn!("hint {} must be at least 1, using 1", key);
                1
            }
            Ok(value) => value,
            Err(_) => {
                warn!("ignoring hint {} with non-integer value {:?}", key, value.trim());
                return;
            }
        };
        match key {
            HintKey::Parallel => self.parallel = Some(value),
            HintKey::BatchSize => self.batch_size = Some(value),
        }
    }
}
