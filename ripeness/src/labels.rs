use crate::internal::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of ripeness classes the classifier head projects to.
pub const NUM_CLASSES: usize = 4;

/// Ripeness categories, in the order of the classifier output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ripeness {
    Green,
    Ripe,
    Overripe,
    Decay,
}

impl Ripeness {
    pub const ALL: [Ripeness; NUM_CLASSES] =
        [Ripeness::Green, Ripeness::Ripe, Ripeness::Overripe, Ripeness::Decay];

    pub fn from_index(ix: usize) -> TractResult<Ripeness> {
        Self::ALL.get(ix).copied().with_context(|| {
            format!("Class index {ix} is out of range for {NUM_CLASSES} ripeness labels")
        })
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Ripeness::Green => "Green",
            Ripeness::Ripe => "Ripe",
            Ripeness::Overripe => "Overripe",
            Ripeness::Decay => "Decay",
        }
    }
}

impl fmt::Display for Ripeness {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn index_roundtrip() -> TractResult<()> {
        for (ix, label) in Ripeness::ALL.iter().enumerate() {
            assert_eq!(Ripeness::from_index(ix)?, *label);
            assert_eq!(label.index(), ix);
        }
        Ok(())
    }

    #[test]
    fn out_of_range_is_an_error() {
        assert!(Ripeness::from_index(NUM_CLASSES).is_err());
        assert!(Ripeness::from_index(usize::MAX).is_err());
    }

    #[test]
    fn serializes_as_bare_label() -> TractResult<()> {
        assert_eq!(serde_json::to_string(&Ripeness::Overripe)?, "\"Overripe\"");
        assert_eq!(Ripeness::Decay.to_string(), "Decay");
        Ok(())
    }
}
