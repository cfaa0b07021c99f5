pub mod approval;
pub mod event;
pub mod notice;
pub mod notification;
pub mod signature;
