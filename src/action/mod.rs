pub mod parser;
pub mod types;

pub use parser::{parse, parse_prediction, ParseContext};
pub use types::{ParsedAction, Prediction, ScreenPoint, ScrollDirection};
