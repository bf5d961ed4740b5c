pub mod beam_decoder;
pub mod decode_stream;

pub use beam_decoder::{BeamDecoder, DecoderModel};
pub use decode_stream::DecodeStream;
