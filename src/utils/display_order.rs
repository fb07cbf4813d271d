//! Display-order helpers
//!
//! Orders are kept as `Vec<String>` in memory and as comma separated
//! strings in the snapshot.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Split a stored order; an empty string is an empty list
pub fn csv_to_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn list_to_csv(list: &[String]) -> String {
    list.join(",")
}

/// Append an id unless it is already listed
pub fn add_display_order(list: &mut Vec<String>, unique_id: &str) {
    if !list.iter().any(|id| id == unique_id) {
        list.push(unique_id.to_string());
    }
}

/// Remove an id, reporting whether it was present
pub fn remove_display_order(list: &mut Vec<String>, unique_id: &str) -> bool {
    let before = list.len();
    list.retain(|id| id != unique_id);
    list.len() != before
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            other => Err(format!("Invalid direction: '{}'", other)),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

/// Move `unique_id` one slot in `direction`, returning the new order
pub fn reorder(list: &[String], unique_id: &str, direction: Direction) -> Result<Vec<String>, String> {
    let index = list
        .iter()
        .position(|id| id == unique_id)
        .ok_or_else(|| format!("Item not found in the display order: {}", unique_id))?;

    let mut reordered = list.to_vec();
    match direction {
        Direction::Up => {
            if index == 0 {
                return Err("Cannot move above the first item in the list".to_string());
            }
            reordered.swap(index, index - 1);
        }
        Direction::Down => {
            if index + 1 == list.len() {
                return Err("Cannot move below the last item in the list".to_string());
            }
            reordered.swap(index, index + 1);
        }
    }
    Ok(reordered)
}

/// `#[serde(with = ...)]` adapter storing a list as a CSV string
pub mod csv {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(list: &[String], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::list_to_csv(list))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(super::csv_to_list(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &str) -> Vec<String> {
        csv_to_list(raw)
    }

    #[test]
    fn test_csv_helpers() {
        assert!(csv_to_list("").is_empty());
        assert_eq!(csv_to_list("a,b, c"), vec!["a", "b", "c"]);
        assert_eq!(list_to_csv(&ids("a,b")), "a,b");
    }

    #[test]
    fn test_add_and_remove() {
        let mut order = ids("a");
        add_display_order(&mut order, "b");
        add_display_order(&mut order, "b");
        assert_eq!(order, ids("a,b"));
        assert!(remove_display_order(&mut order, "a"));
        assert!(!remove_display_order(&mut order, "a"));
        assert_eq!(order, ids("b"));
    }

    #[test]
    fn test_reorder_moves_neighbours() {
        let order = ids("a,b,c");
        assert_eq!(reorder(&order, "b", Direction::Up).unwrap(), ids("b,a,c"));
        assert_eq!(reorder(&order, "b", Direction::Down).unwrap(), ids("a,c,b"));
    }

    #[test]
    fn test_reorder_edges() {
        let order = ids("a,b");
        assert!(reorder(&order, "a", Direction::Up).is_err());
        assert!(reorder(&order, "b", Direction::Down).is_err());
        assert!(reorder(&order, "zzz", Direction::Up).is_err());
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!("up".parse::<Direction>(), Ok(Direction::Up));
        assert!("sideways".parse::<Direction>().is_err());
    }
}
