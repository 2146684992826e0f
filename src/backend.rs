// src/backend.rs

//! Backend selection: NdArray on CPU unless the `wgpu` feature is enabled.

use burn::tensor::backend::Backend;
use log::info;

#[cfg(not(feature = "wgpu"))]
pub type AutoBackend = burn::backend::NdArray<f32>;

#[cfg(feature = "wgpu")]
pub type AutoBackend = burn::backend::Wgpu;

pub fn get_device() -> <AutoBackend as Backend>::Device {
    Default::default()
}

pub fn print_backend_info() {
    #[cfg(not(feature = "wgpu"))]
    info!("Backend: NdArray<f32> (CPU)");
    #[cfg(feature = "wgpu")]
    info!("Backend: WGPU (default device)");
    info!("Device: {:?}", get_device());
}
