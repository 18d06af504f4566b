pub mod config;
pub mod driver;
pub mod led;
pub mod state;
pub mod transition;

pub mod prelude {
    pub use crate::{config::*, driver::*, led::*, state::*, transition::*};
}
