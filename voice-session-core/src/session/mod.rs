pub mod agent;
pub mod device;
pub mod feed;
pub mod recorder;
pub mod widget;
