//! Experiment data model shared between plans, flyers and document consumers.

pub mod document;
