pub mod backend;
pub mod capture;
pub mod chunk;
pub mod cpal;
pub mod device;
pub mod mixer;
pub mod synth;

pub use backend::{AudioBackend, AudioBackendConfig, AudioFrame, BackendFactory, BackendKind};
pub use capture::{CaptureEngine, CaptureEngineConfig, CaptureSession, LevelMeter, SourceHandle};
pub use chunk::{decode_wav, encode_wav, ChunkRecorder};
pub use device::{list_input_devices, list_output_capable_sources, probe_access, DeviceInfo, DeviceWatcher};
pub use mixer::{MixerConfig, MonitorMixer};
pub use synth::{SynthBackend, SynthSpec};
