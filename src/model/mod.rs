pub mod device;
pub mod notification;

pub use device::Device;
pub use notification::Notification;
