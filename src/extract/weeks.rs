use once_cell::sync::Lazy;
use regex::Regex;
use std::{collections::BTreeSet, path::Path};
use tracing::warn;

// a bare number must be unpadded so month folders like `07` are not weeks
static WEEK_FOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:(?:week|wk|w)\s*(\d{1,2})|([1-9]\d?))$").expect("week folder regex")
});

/// A set of week numbers parsed from input such as `26`, `26,27,28` or `26-28`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeekSelection {
    weeks: BTreeSet<u32>,
}

impl WeekSelection {
    /// Parse a comma separated list of weeks and inclusive ranges.
    /// Parts that do not parse are logged and skipped.
    pub fn parse(input: &str) -> Self {
        let mut weeks = BTreeSet::new();
        for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if let Some((start, end)) = part.split_once('-') {
                match (start.trim().parse::<u32>(), end.trim().parse::<u32>()) {
                    (Ok(s), Ok(e)) if s <= e => weeks.extend(s..=e),
                    _ => warn!(part, "invalid week range"),
                }
            } else {
                match part.parse::<u32>() {
                    Ok(w) => {
                        weeks.insert(w);
                    }
                    Err(_) => warn!(part, "invalid week number"),
                }
            }
        }
        Self { weeks }
    }

    pub fn contains(&self, week: u32) -> bool {
        self.weeks.contains(&week)
    }

    pub fn is_empty(&self) -> bool {
        self.weeks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.weeks.iter().copied()
    }
}

/// Week number (1..=53) of a folder named `Week 26`, `Wk26`, `W26`, `26`, ...
pub fn week_of_folder(name: &str) -> Option<u32> {
    let caps = WEEK_FOLDER.captures(name.trim())?;
    let week: u32 = caps.get(1).or_else(|| caps.get(2))?.as_str().parse().ok()?;
    (1..=53).contains(&week).then_some(week)
}

/// Week of the nearest enclosing week folder of `relative` (a path relative
/// to the source folder, file name included).
pub fn enclosing_week(relative: &Path) -> Option<u32> {
    relative
        .parent()?
        .components()
        .rev()
        .filter_map(|c| c.as_os_str().to_str())
        .find_map(week_of_folder)
}
