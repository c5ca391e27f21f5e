mod log;
mod number;
mod rwlock;

pub use self::log::init_log;
pub use number::{ceil_div, floor_div};
pub use rwlock::{lock_state, HandyRwLock};
