pub mod alert;
pub mod care_grant;
pub mod dose_event;
pub mod medication;
pub mod reminder;
