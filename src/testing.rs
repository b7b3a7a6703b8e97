use crate::algorithm::{Algorithm, Encoder};
use crate::error::Result;
use crate::output::Output;
use compression_core::Level;

/// An algorithm rewriting every chunk `X` into `<compressed:len(X)>`.
pub(crate) struct Marker;

struct MarkerEncoder;

impl Algorithm for Marker {
    fn token(&self) -> &str {
        "test"
    }

    fn name(&self) -> &str {
        "test"
    }

    fn supported(&self) -> bool {
        true
    }

    fn encoder(&self, _level: Level) -> Result<Box<dyn Encoder>> {
        Ok(Box::new(MarkerEncoder))
    }
}

impl Encoder for MarkerEncoder {
    fn write(&mut self, chunk: &[u8], sink: &mut dyn Output) -> Result<()> {
        sink.write(format!("<compressed:{}>", chunk.len()).as_bytes())
    }

    fn flush(&mut self, sink: &mut dyn Output) -> Result<()> {
        sink.flush()
    }

    fn finish(&mut self, _sink: &mut dyn Output) -> Result<()> {
        Ok(())
    }
}
