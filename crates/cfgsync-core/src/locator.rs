//! Locations inside a live value tree.
//!
//! A [`Locator`] is the list of steps leading from the root value to one
//! node: a struct field by name, a sequence element by position, or a mapping
//! entry by key. Locators are the identity of a node; two locators are equal
//! exactly when they denote the same storage location.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// One step from a node to one of its children.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    Field(String),
    Index(usize),
    Key(String),
}

/// Path of steps from the root value to a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator(SmallVec<[Step; 4]>);

impl Locator {
    /// The root value.
    pub fn root() -> Self {
        Locator(SmallVec::new())
    }

    /// Returns a new locator one step further down.
    pub fn child(&self, step: Step) -> Self {
        let mut steps = self.0.clone();
        steps.push(step);
        Locator(steps)
    }

    pub fn steps(&self) -> &[Step] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if `self` lies strictly beneath `ancestor`.
    pub fn is_below(&self, ancestor: &Locator) -> bool {
        self.0.len() > ancestor.0.len() && self.0.starts_with(&ancestor.0[..])
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        for (i, step) in self.0.iter().enumerate() {
            match step {
                Step::Field(name) if i == 0 => write!(f, "{name}")?,
                Step::Field(name) => write!(f, ".{name}")?,
                Step::Index(index) => write!(f, "[{index}]")?,
                Step::Key(key) => write!(f, "[{key:?}]")?,
            }
        }
        Ok(())
    }
}
