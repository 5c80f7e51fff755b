//! Testing utilities and harness for weave views

pub mod harness;

pub use harness::*;

pub mod prelude {
    pub use crate::harness::*;
    pub use weave_core::{deps, view_fn, Cleanup, EffectTrigger, Element, View, Widget};
}
