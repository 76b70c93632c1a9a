//! Back ends that serialize an IR module into a consumable binary form.

pub mod spv;
