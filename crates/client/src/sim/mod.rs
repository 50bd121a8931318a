mod camera;
mod sensors;

pub use camera::SyntheticCamera;
pub use sensors::NoisySensorPlatform;
