use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{
  Deserialize,
  Serialize
};

use crate::todo::Todo;

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
  #[default]
  All,
  Active,
  Completed
}

impl Filter {
  pub fn matches(
    self,
    todo: &Todo
  ) -> bool {
    match self {
      | Filter::All => true,
      | Filter::Active => {
        !todo.completed
      }
      | Filter::Completed => {
        todo.completed
      }
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      | Filter::All => "all",
      | Filter::Active => "active",
      | Filter::Completed => {
        "completed"
      }
    }
  }
}

impl fmt::Display for Filter {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Filter {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "all" => Ok(Filter::All),
      | "active" | "pending" => {
        Ok(Filter::Active)
      }
      | "completed" | "done" => {
        Ok(Filter::Completed)
      }
      | other => {
        Err(anyhow!(
          "unknown filter: {other} \
           (expected all, active or \
           completed)"
        ))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::Filter;
  use crate::todo::Todo;

  #[test]
  fn parses_case_insensitively() {
    assert_eq!(
      " Active ".parse::<Filter>().unwrap(),
      Filter::Active
    );
    assert_eq!(
      "DONE".parse::<Filter>().unwrap(),
      Filter::Completed
    );
    assert!(
      "someday"
        .parse::<Filter>()
        .is_err()
    );
  }

  #[test]
  fn matches_by_completion() {
    let mut todo = Todo::new_local(
      "x".to_string(),
      0
    );
    assert!(Filter::All.matches(&todo));
    assert!(
      Filter::Active.matches(&todo)
    );
    assert!(
      !Filter::Completed.matches(&todo)
    );

    todo.completed = true;
    assert!(
      Filter::Completed.matches(&todo)
    );
    assert!(
      !Filter::Active.matches(&todo)
    );
  }
}
