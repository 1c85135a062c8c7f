//! `reverie-distill` – The Distillation Pipeline.
//!
//! Compresses attempt logs into memory units the retrieval layer can use.
//!
//! # Modules
//!
//! - [`reducers`] – deterministic per-scenario reducers and the
//!   [`ReducerRegistry`][reducers::ReducerRegistry].
//! - [`generative`] – the [`Generator`][generative::Generator] seam, the
//!   reply schema and the grounding rules that keep model output factual.
//! - [`raw`] – [`raw_episode`][raw::raw_episode], the unreduced record kept
//!   for the raw arm.
//! - [`pipeline`] – [`Distiller`][pipeline::Distiller], which ties the above
//!   together behind one `distill` call.
//!
//! # Example
//!
//! ```rust
//! use reverie_distill::{Distiller, DistillStyle};
//! use reverie_types::{AttemptLog, ScenarioDetails};
//!
//! let log = AttemptLog::new(
//!     "lever_puzzle_3",
//!     "run-1",
//!     4,
//!     true,
//!     ScenarioDetails::LeverPuzzle { sequence: vec![2, 3, 1] },
//! );
//! let units = Distiller::default().distill_template(&log);
//! assert_eq!(units[0].text, "Successful lever sequence 2-3-1 at attempt 4");
//! ```

pub mod generative;
pub mod pipeline;
pub mod raw;
pub mod reducers;

pub use generative::{GenerationError, GenerationOptions, Generator};
pub use pipeline::{DistillStyle, Distiller};
pub use raw::raw_episode;
pub use reducers::{Reducer, ReducerRegistry};
