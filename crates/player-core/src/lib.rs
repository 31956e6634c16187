pub mod audio;
pub mod buffering;
pub mod clock;
pub mod config;
pub mod decode;
pub mod demux;
pub mod frame;
pub mod http;
pub mod message;
pub mod output;
pub mod pipeline;
pub mod player;
pub mod probe;
pub mod queue;
pub mod resample;
pub mod source;
pub mod state;
pub mod video;
