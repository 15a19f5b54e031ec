mod utils;
mod votes;

pub use utils::{test_db, test_utils};
