pub mod alert;
pub mod dose_event;
pub mod enums;
pub mod medication;
pub mod overview;
pub mod reminder;

pub use alert::*;
pub use dose_event::*;
pub use enums::*;
pub use medication::*;
pub use overview::*;
pub use reminder::*;
