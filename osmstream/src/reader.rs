use std::{
    fmt,
    fs::File,
    io::{BufReader, Read},
    iter::FusedIterator,
    path::{Path, PathBuf},
    sync::Arc,
};

use flate2::read::MultiGzDecoder;
use log::{debug, warn};
use xz2::read::XzDecoder;

use crate::{
    filter::effective_filter,
    parser::{pbf::PbfDecoder, xml::XmlDecoder, EntityDecoder},
    Counts, DecodeError, ElementFilter, Entity, Error, Handler, OsmObject,
};

const BUF_SIZE: usize = 1024 * 1024; // 1MB

/// Encoding of an OSM file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// `.osm` XML, one element per entity
    Xml,
    /// `.osm.pbf`, length-prefixed protobuf blobs
    Pbf,
}

/// Outer compression wrapped around the whole file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Xz,
}

/// A file to read, with its format and compression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsmFile {
    path: PathBuf,
    format: FileFormat,
    compression: Compression,
}

impl OsmFile {
    /// Detects format and compression from the file name: `.osm` / `.xml`
    /// optionally followed by `.gz` or `.xz`, and `.osm.pbf` / `.pbf`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let (stem, compression) = if let Some(stem) = name.strip_suffix(".gz") {
            (stem, Compression::Gzip)
        } else if let Some(stem) = name.strip_suffix(".xz") {
            (stem, Compression::Xz)
        } else {
            (name.as_str(), Compression::None)
        };

        let format = if stem.ends_with(".pbf") && compression == Compression::None {
            FileFormat::Pbf
        } else if stem.ends_with(".osm") || stem.ends_with(".xml") {
            FileFormat::Xml
        } else {
            return Err(Error::UnsupportedFormat(path.display().to_string()));
        };

        Ok(Self {
            path,
            format,
            compression,
        })
    }

    /// Uses the given format and compression regardless of the file name.
    pub fn with_format<P: AsRef<Path>>(path: P, format: FileFormat, compression: Compression) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            format,
            compression,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }
}

/// File-level metadata available before the first entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    /// Program that wrote the file, if recorded.
    pub generator: Option<String>,
    /// Declared extent(s) of the data.
    pub bounds: Vec<BoundingBox>,
}

/// Extent in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

/// Opens OSM data and configures which entities get decoded.
pub struct OsmReader {
    source: Box<dyn Read + Send>,
    format: FileFormat,
    filter: ElementFilter,
}

impl OsmReader {
    /// Creates a new OsmReader from a file path, detecting the format from
    /// its name.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        Self::open(&OsmFile::new(path)?)
    }

    pub fn open(file: &OsmFile) -> Result<Self, Error> {
        if file.format == FileFormat::Pbf && file.compression != Compression::None {
            return Err(Error::UnsupportedFormat(format!(
                "{} (PBF files cannot carry outer compression)",
                file.path.display()
            )));
        }

        let handle = File::open(&file.path).map_err(|e| Error::Open {
            path: file.path.clone(),
            source: Arc::new(e),
        })?;
        debug!(
            "opened {} as {:?} ({:?} compression)",
            file.path.display(),
            file.format,
            file.compression
        );

        let source: Box<dyn Read + Send> = match file.compression {
            Compression::None => Box::new(handle),
            Compression::Gzip => Box::new(MultiGzDecoder::new(BufReader::new(handle))),
            Compression::Xz => Box::new(XzDecoder::new(BufReader::new(handle))),
        };
        Ok(Self::from_reader(source, file.format))
    }

    /// Reads already decompressed data of `format` from any source.
    pub fn from_reader<R: Read + Send + 'static>(reader: R, format: FileFormat) -> Self {
        Self {
            source: Box::new(reader),
            format,
            filter: ElementFilter::all(),
        }
    }

    /// Restricts decoding to the kinds enabled in `filter`.
    /// If you only are interested in specific elements, prefer this over
    /// filtering yourself since disabled records are never materialized.
    pub fn with_filter(mut self, filter: ElementFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn filter(&self) -> ElementFilter {
        self.filter
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    /// Reads the header and returns a stream positioned at the first entity.
    pub fn entities(self) -> Result<EntityStream, Error> {
        let source = BufReader::with_capacity(BUF_SIZE, self.source);
        let decoder: Box<dyn EntityDecoder> = match self.format {
            FileFormat::Xml => Box::new(XmlDecoder::new(source)?),
            FileFormat::Pbf => Box::new(PbfDecoder::new(source)?),
        };
        let header = decoder.header().clone();
        debug!(
            "header: generator {:?}, {} bounding box(es)",
            header.generator,
            header.bounds.len()
        );

        Ok(EntityStream {
            state: State::Reading(decoder),
            header,
            filter: self.filter,
            delivered: 0,
            error_yielded: false,
        })
    }

    /// Streams every entity to the matching callback of `handler`, in file
    /// order. Kinds without a callback are not decoded at all.
    pub fn apply(self, handler: &mut Handler<'_>) -> Result<Counts, Error> {
        let filter = effective_filter(self.filter, handler);
        let mut stream = self.with_filter(filter).entities()?;

        let mut counts = Counts::default();
        while let Some(entity) = stream.next_entity()? {
            if handler.dispatch(&entity) {
                counts.record(entity.kind());
            }
        }
        Ok(counts)
    }
}

impl fmt::Debug for OsmReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OsmReader")
            .field("format", &self.format)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

enum State {
    Reading(Box<dyn EntityDecoder>),
    Ended,
    Errored(DecodeError),
}

/// Sequential entities of one source.
///
/// The stream either reaches a clean end or fails with a [`DecodeError`].
/// Both outcomes are terminal: later calls repeat them without touching the
/// source again, which is released as soon as the stream leaves the reading
/// state.
pub struct EntityStream {
    state: State,
    header: Header,
    filter: ElementFilter,
    delivered: u64,
    error_yielded: bool,
}

impl EntityStream {
    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn filter(&self) -> ElementFilter {
        self.filter
    }

    /// Number of entities returned so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// True once the stream has ended or failed.
    pub fn is_finished(&self) -> bool {
        !matches!(self.state, State::Reading(_))
    }

    pub fn next_entity(&mut self) -> Result<Option<Entity>, DecodeError> {
        let decoder = match &mut self.state {
            State::Reading(decoder) => decoder,
            State::Ended => return Ok(None),
            State::Errored(err) => return Err(err.clone()),
        };

        match decoder.next_entity(&self.filter) {
            Ok(Some(entity)) => {
                self.delivered += 1;
                Ok(Some(entity))
            }
            Ok(None) => {
                debug!(
                    "end of input at byte {} after {} entities",
                    decoder.position(),
                    self.delivered
                );
                self.state = State::Ended;
                Ok(None)
            }
            Err(err) => {
                warn!("stream failed after {} entities: {}", self.delivered, err);
                self.state = State::Errored(err.clone());
                Err(err)
            }
        }
    }

    /// Ends the stream early and releases the source.
    pub fn close(&mut self) {
        if let State::Reading(decoder) = &self.state {
            debug!(
                "closed at byte {} after {} entities",
                decoder.position(),
                self.delivered
            );
        }
        self.state = State::Ended;
    }
}

impl Iterator for EntityStream {
    type Item = Result<Entity, DecodeError>;

    /// Yields a decode error once, then `None`.
    fn next(&mut self) -> Option<Self::Item> {
        if self.error_yielded {
            return None;
        }
        match self.next_entity() {
            Ok(entity) => entity.map(Ok),
            Err(err) => {
                self.error_yielded = true;
                Some(Err(err))
            }
        }
    }
}

impl FusedIterator for EntityStream {}

impl fmt::Debug for EntityStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Reading(_) => "reading",
            State::Ended => "ended",
            State::Errored(_) => "errored",
        };
        f.debug_struct("EntityStream")
            .field("state", &state)
            .field("header", &self.header)
            .field("filter", &self.filter)
            .field("delivered", &self.delivered)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use super::*;
    use crate::EntityKind;

    const XML: &str = r#"<osm generator="unit">
<node id="1" version="1" lat="1" lon="1"/>
<way id="2" version="1"><nd ref="1"/></way>
<relation id="3" version="1"><member type="way" ref="2" role=""/></relation>
</osm>"#;

    fn reader(xml: &'static str) -> OsmReader {
        OsmReader::from_reader(Cursor::new(xml), FileFormat::Xml)
    }

    #[test]
    fn test_detects_format_from_name() {
        let cases = [
            ("winthrop.osm", FileFormat::Xml, Compression::None),
            ("data/extract.XML", FileFormat::Xml, Compression::None),
            ("planet.osm.gz", FileFormat::Xml, Compression::Gzip),
            ("planet.osm.xz", FileFormat::Xml, Compression::Xz),
            ("monaco-latest.osm.pbf", FileFormat::Pbf, Compression::None),
        ];
        for (name, format, compression) in cases {
            let file = OsmFile::new(name).unwrap();
            assert_eq!((file.format(), file.compression()), (format, compression), "{}", name);
        }

        for name in ["notes.txt", "planet.osm.pbf.gz", "osm"] {
            assert!(
                matches!(OsmFile::new(name), Err(Error::UnsupportedFormat(_))),
                "{}",
                name
            );
        }
    }

    #[test]
    fn test_open_missing_file() {
        let err = OsmReader::from_path("/nonexistent/winthrop.osm").unwrap_err();
        assert!(matches!(err, Error::Open { .. }));
    }

    #[test]
    fn test_ended_stream_stays_ended() {
        let mut stream = reader(XML).entities().unwrap();
        assert_eq!(stream.header().generator.as_deref(), Some("unit"));
        let mut seen = 0;
        while stream.next_entity().unwrap().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 3);
        assert!(stream.is_finished());
        assert_eq!(stream.next_entity(), Ok(None));
        assert_eq!(stream.next_entity(), Ok(None));
        assert_eq!(stream.header().generator.as_deref(), Some("unit"));
    }

    #[test]
    fn test_errored_stream_repeats_error() {
        let xml = r#"<osm><node id="1" version="1" lat="1" lon="1"/><node id="2"/></osm>"#;
        let mut stream = reader(xml).entities().unwrap();
        assert!(stream.next_entity().unwrap().is_some());
        let first = stream.next_entity().unwrap_err();
        assert!(matches!(first, DecodeError::InvalidVersion { id: 2, .. }));
        assert_eq!(stream.next_entity(), Err(first.clone()));
        assert_eq!(stream.next_entity(), Err(first));
        assert_eq!(stream.delivered(), 1);
    }

    #[test]
    fn test_iterator_yields_error_once() {
        let xml = r#"<osm><way id="1" version="1"><nd ref="x"/></way><node id="2"/></osm>"#;
        let items: Vec<_> = reader(xml).entities().unwrap().collect();
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(DecodeError::InvalidAttribute { .. })));
    }

    #[test]
    fn test_close_ends_stream() {
        let mut stream = reader(XML).entities().unwrap();
        assert!(stream.next_entity().unwrap().is_some());
        stream.close();
        assert!(stream.is_finished());
        assert_eq!(stream.next_entity(), Ok(None));
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_apply_counts_only_registered_kinds() {
        let mut way_ids = Vec::new();
        let counts = {
            let mut handler = Handler::new();
            handler.on_way(|way| way_ids.push(way.id()));
            reader(XML).apply(&mut handler).unwrap()
        };
        assert_eq!(way_ids, [2]);
        assert_eq!(
            counts,
            Counts {
                nodes: 0,
                ways: 1,
                relations: 0
            }
        );
    }

    #[test]
    fn test_filter_on_reader() {
        let kinds: Vec<EntityKind> = reader(XML)
            .with_filter(ElementFilter::from_options(Some(false), None, Some(false)))
            .entities()
            .unwrap()
            .map(|entity| entity.unwrap().kind())
            .collect();
        assert_eq!(kinds, [EntityKind::Way]);
    }

    #[test]
    fn test_reads_gzip_xml_file() {
        let path = std::env::temp_dir().join(format!("osmstream-{}.osm.gz", std::process::id()));
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(XML.as_bytes()).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let result: Result<Vec<Entity>, DecodeError> =
            OsmReader::from_path(&path).unwrap().entities().unwrap().collect();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(result.unwrap().len(), 3);
    }
}
