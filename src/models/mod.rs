pub mod event;
pub mod job;
pub mod photo;
pub mod upload;
