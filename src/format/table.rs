/// Format capability table

use crate::error::Result;
use crate::filesystem::{AmigaCodec, FileSystemCodec, GenericCodec};
use crate::format::{ImageFormat, ImageInfo};
use crate::image::Volume;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Builds the file system codec for a freshly opened volume
pub type CodecFactory =
    Arc<dyn Fn(&Volume, &ImageInfo) -> Result<Arc<dyn FileSystemCodec>> + Send + Sync>;

/// What the mount core can do with each image format
///
/// Every format-dependent decision (which codec interprets a volume) is looked
/// up here, so adding a format means adding a row rather than another branch.
#[derive(Clone)]
pub struct FormatTable {
    codecs: BTreeMap<ImageFormat, CodecFactory>,
}

impl FormatTable {
    /// Table without any formats
    pub fn empty() -> Self {
        Self {
            codecs: BTreeMap::new(),
        }
    }

    /// Install or replace the codec factory of a format
    pub fn register<F>(&mut self, format: ImageFormat, factory: F) -> &mut Self
    where
        F: Fn(&Volume, &ImageInfo) -> Result<Arc<dyn FileSystemCodec>> + Send + Sync + 'static,
    {
        self.codecs.insert(format, Arc::new(factory));
        self
    }

    /// Is the format mountable?
    pub fn supports(&self, format: ImageFormat) -> bool {
        self.codecs.contains_key(&format)
    }

    /// Formats with a codec
    pub fn formats(&self) -> impl Iterator<Item = ImageFormat> + '_ {
        self.codecs.keys().copied()
    }

    /// Create the codec for a volume
    pub fn codec_for(&self, volume: &Volume, info: &ImageInfo) -> Result<Arc<dyn FileSystemCodec>> {
        match self.codecs.get(&info.format) {
            Some(factory) => factory(volume, info),
            None => Ok(Arc::new(GenericCodec::new(info.format, volume))),
        }
    }
}

impl Default for FormatTable {
    fn default() -> Self {
        let mut table = Self::empty();
        for format in [ImageFormat::Adf, ImageFormat::Hdf] {
            table.register(format, |volume, info| {
                Ok(match AmigaCodec::detect(&volume.peek())? {
                    Some(codec) => Arc::new(codec) as Arc<dyn FileSystemCodec>,
                    None => Arc::new(GenericCodec::new(info.format, volume)),
                })
            });
        }
        for format in [ImageFormat::Img, ImageFormat::St, ImageFormat::D64] {
            table.register(format, |volume, info| {
                Ok(Arc::new(GenericCodec::new(info.format, volume)) as Arc<dyn FileSystemCodec>)
            });
        }
        table
    }
}

impl fmt::Debug for FormatTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.codecs.keys()).finish()
    }
}
