use std::{
    collections::VecDeque,
    io::{self, Read},
    vec,
};

use log::{debug, trace};
use quick_protobuf::{BytesReader, MessageRead};

use crate::{
    delta::{delta_decoded, DeltaCursor},
    fileformat::{Blob, BlobHeader},
    osmformat::{self, DenseNodes, HeaderBlock, MemberType, PrimitiveBlock},
    parser::EntityDecoder,
    BoundingBox, DecodeError, ElementFilter, Entity, EntityKind, Header, Info, Location, Member,
    Members, Node, NodeRefs, Relation, Tags, Way,
};

const MAX_HEADER_SIZE: usize = 64 * 1024; // 64KB
const MAX_BLOB_SIZE: usize = 32 * 1024 * 1024; // 32MB
const SUPPORTED_FEATURES: [&str; 3] = ["OsmSchema-V0.6", "DenseNodes", "HistoricalInformation"];

enum BlobKind {
    Header,
    Data,
}

/// Decoder for `.osm.pbf` files.
///
/// Blobs are read and decompressed one at a time; entities of the current
/// block are materialized on demand.
pub(crate) struct PbfDecoder<R: Read> {
    reader: R,
    position: u64,
    header_buf: Vec<u8>,
    blob_buf: Vec<u8>,
    header: Header,
    block: Option<BlockCursor>,
    pending_data: Option<u64>,
}

impl<R: Read + Send> PbfDecoder<R> {
    /// Reads frames until the `OSMHeader` blob (or the first data blob, for
    /// files without one).
    pub(crate) fn new(reader: R) -> Result<Self, DecodeError> {
        let mut decoder = Self {
            reader,
            position: 0,
            header_buf: Vec::with_capacity(MAX_HEADER_SIZE),
            blob_buf: Vec::new(),
            header: Header::default(),
            block: None,
            pending_data: None,
        };

        match decoder.next_frame()? {
            Some((BlobKind::Header, position)) => {
                let data = decompress(&decoder.blob_buf, position)?;
                decoder.header = read_header_block(&data, position)?;
            }
            Some((BlobKind::Data, position)) => {
                debug!("no OSMHeader blob before data at byte {}", position);
                decoder.pending_data = Some(position);
            }
            None => {}
        }
        Ok(decoder)
    }

    // Reads one frame into `blob_buf`, skipping blob types we do not know.
    // Returns `Ok(None)` when the input ends exactly on a frame boundary.
    fn next_frame(&mut self) -> Result<Option<(BlobKind, u64)>, DecodeError> {
        loop {
            let position = self.position;
            let mut prefix = [0u8; 4];
            if !self.read_prefix(&mut prefix)? {
                return Ok(None);
            }

            let header_size = u32::from_be_bytes(prefix) as usize;
            if header_size > MAX_HEADER_SIZE {
                return Err(DecodeError::SizeLimit {
                    context: "blob header",
                    size: header_size,
                    max: MAX_HEADER_SIZE,
                    position,
                });
            }

            self.header_buf.resize(header_size, 0);
            read_exact(
                &mut self.reader,
                &mut self.header_buf,
                "blob header",
                &mut self.position,
            )?;

            // Deserialize blob header to get size of blob
            let mut reader = BytesReader::from_bytes(&self.header_buf);
            let header = BlobHeader::from_reader(&mut reader, &self.header_buf)
                .map_err(|e| pbf_error(e, position))?;
            let blob_size = usize::try_from(header.datasize).map_err(|_| DecodeError::Pbf {
                position,
                message: format!("negative blob size {}", header.datasize),
            })?;
            if blob_size > MAX_BLOB_SIZE {
                return Err(DecodeError::SizeLimit {
                    context: "blob",
                    size: blob_size,
                    max: MAX_BLOB_SIZE,
                    position,
                });
            }

            let kind = match &*header.type_pb {
                "OSMHeader" => BlobKind::Header,
                "OSMData" => BlobKind::Data,
                other => {
                    trace!("skipping {} blob at byte {}", other, position);
                    let skipped = io::copy(
                        &mut (&mut self.reader).take(blob_size as u64),
                        &mut io::sink(),
                    )
                    .map_err(|e| DecodeError::io(e, self.position))?;
                    self.position += skipped;
                    if skipped < blob_size as u64 {
                        return Err(DecodeError::Truncated {
                            context: "blob",
                            position,
                        });
                    }
                    continue;
                }
            };

            self.blob_buf.resize(blob_size, 0);
            read_exact(&mut self.reader, &mut self.blob_buf, "blob", &mut self.position)?;
            return Ok(Some((kind, position)));
        }
    }

    // False on a clean end of input before the first prefix byte.
    fn read_prefix(&mut self, prefix: &mut [u8; 4]) -> Result<bool, DecodeError> {
        let mut filled = 0;
        while filled < prefix.len() {
            match self.reader.read(&mut prefix[filled..]) {
                Ok(0) if filled == 0 => return Ok(false),
                Ok(0) => {
                    return Err(DecodeError::Truncated {
                        context: "blob header length",
                        position: self.position,
                    })
                }
                Ok(n) => {
                    filled += n;
                    self.position += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(DecodeError::io(e, self.position)),
            }
        }
        Ok(true)
    }

    fn load_block(&mut self, position: u64, filter: &ElementFilter) -> Result<(), DecodeError> {
        if filter.is_empty() {
            trace!("skipping data blob at byte {}, no kinds enabled", position);
            return Ok(());
        }
        let data = decompress(&self.blob_buf, position)?;
        self.block = Some(BlockCursor::new(&data, filter, position)?);
        Ok(())
    }
}

impl<R: Read + Send> EntityDecoder for PbfDecoder<R> {
    fn header(&self) -> &Header {
        &self.header
    }

    fn next_entity(&mut self, filter: &ElementFilter) -> Result<Option<Entity>, DecodeError> {
        if let Some(position) = self.pending_data.take() {
            self.load_block(position, filter)?;
        }
        loop {
            if let Some(block) = &mut self.block {
                if let Some(entity) = block.next_entity()? {
                    return Ok(Some(entity));
                }
                self.block = None;
            }

            match self.next_frame()? {
                None => return Ok(None),
                Some((BlobKind::Data, position)) => self.load_block(position, filter)?,
                Some((BlobKind::Header, position)) => {
                    // Still has to be one we can read.
                    let data = decompress(&self.blob_buf, position)?;
                    read_header_block(&data, position)?;
                    trace!("ignoring repeated OSMHeader blob at byte {}", position);
                }
            }
        }
    }

    fn position(&self) -> u64 {
        self.position
    }
}

fn read_exact<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    context: &'static str,
    position: &mut u64,
) -> Result<(), DecodeError> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => DecodeError::Truncated {
            context,
            position: *position,
        },
        _ => DecodeError::io(e, *position),
    })?;
    *position += buf.len() as u64;
    Ok(())
}

fn pbf_error(err: quick_protobuf::Error, position: u64) -> DecodeError {
    DecodeError::Pbf {
        position,
        message: err.to_string(),
    }
}

/// Deserializes a Blob and returns its payload, decompressed if needed.
fn decompress(blob_slice: &[u8], position: u64) -> Result<Vec<u8>, DecodeError> {
    let mut reader = BytesReader::from_bytes(blob_slice);
    let blob = Blob::from_reader(&mut reader, blob_slice).map_err(|e| pbf_error(e, position))?;

    // either take the raw_size if available or use 2 * compressed_size as heuristic
    let size = match blob.raw_size {
        Some(raw_size) => (raw_size.max(0) as usize).min(MAX_BLOB_SIZE),
        None => blob_slice.len() * 2,
    };
    let mut decompressed: Vec<u8> = Vec::with_capacity(size);
    let limit = MAX_BLOB_SIZE as u64 + 1;
    let read = if let Some(raw) = &blob.raw {
        decompressed.extend_from_slice(raw);
        Ok(raw.len())
    } else if let Some(zlib) = &blob.zlib_data {
        flate2::read::ZlibDecoder::new(&zlib[..])
            .take(limit)
            .read_to_end(&mut decompressed)
    } else if let Some(lzma) = &blob.lzma_data {
        xz2::read::XzDecoder::new(&lzma[..])
            .take(limit)
            .read_to_end(&mut decompressed)
    } else {
        let compression = if blob.zstd_data.is_some() {
            "zstd"
        } else if blob.lz4_data.is_some() {
            "lz4"
        } else if blob.OBSOLETE_bzip2_data.is_some() {
            "bzip2"
        } else {
            return Err(DecodeError::Pbf {
                position,
                message: "blob carries no data".to_string(),
            });
        };
        return Err(DecodeError::UnsupportedCompression {
            compression,
            position,
        });
    };

    read.map_err(|e| DecodeError::Pbf {
        position,
        message: format!("corrupt compressed blob: {}", e),
    })?;
    if decompressed.len() > MAX_BLOB_SIZE {
        return Err(DecodeError::SizeLimit {
            context: "uncompressed blob",
            size: decompressed.len(),
            max: MAX_BLOB_SIZE,
            position,
        });
    }
    Ok(decompressed)
}

fn read_header_block(data: &[u8], position: u64) -> Result<Header, DecodeError> {
    let mut reader = BytesReader::from_bytes(data);
    let block = HeaderBlock::from_reader(&mut reader, data).map_err(|e| pbf_error(e, position))?;

    for feature in &block.required_features {
        if !SUPPORTED_FEATURES.contains(&&**feature) {
            return Err(DecodeError::UnsupportedFeature {
                feature: feature.to_string(),
                position,
            });
        }
    }
    debug!(
        "OSMHeader: writingprogram {:?}, required features {:?}",
        block.writingprogram, block.required_features
    );

    let bounds = block
        .bbox
        .iter()
        .map(|bbox| BoundingBox {
            min_lon: bbox.left as f64 / 1e9,
            min_lat: bbox.bottom as f64 / 1e9,
            max_lon: bbox.right as f64 / 1e9,
            max_lat: bbox.top as f64 / 1e9,
        })
        .collect();

    Ok(Header {
        generator: block.writingprogram.map(|name| name.into_owned()),
        bounds,
    })
}

// --------------------------- BLOCK ---------------------------

enum GroupCursor {
    Nodes(vec::IntoIter<osmformat::Node>),
    Dense(DenseCursor),
    Ways(vec::IntoIter<osmformat::Way>),
    Relations(vec::IntoIter<osmformat::Relation>),
}

/// Metadata columns before scaling and string lookup.
struct RawInfo {
    version: i64,
    timestamp: i64,
    changeset: i64,
    uid: i64,
    user_sid: i64,
    visible: bool,
}

impl RawInfo {
    fn from_info(info: Option<&osmformat::Info>) -> Self {
        match info {
            Some(info) => RawInfo {
                version: i64::from(info.version),
                timestamp: info.timestamp.unwrap_or(0),
                changeset: info.changeset.unwrap_or(0),
                uid: info.uid.map_or(0, i64::from),
                user_sid: info.user_sid.map_or(0, i64::from),
                visible: info.visible.unwrap_or(true),
            },
            None => RawInfo {
                version: 0,
                timestamp: 0,
                changeset: 0,
                uid: 0,
                user_sid: 0,
                visible: true,
            },
        }
    }
}

/// Entities of one decompressed `PrimitiveBlock`, accepted groups only.
struct BlockCursor {
    strings: Vec<Vec<u8>>,
    granularity: i64,
    lat_offset: i64,
    lon_offset: i64,
    date_granularity: i64,
    position: u64,
    groups: VecDeque<GroupCursor>,
}

impl BlockCursor {
    fn new(data: &[u8], filter: &ElementFilter, position: u64) -> Result<Self, DecodeError> {
        let mut reader = BytesReader::from_bytes(data);
        let block =
            PrimitiveBlock::from_reader(&mut reader, data).map_err(|e| pbf_error(e, position))?;

        let mut groups = VecDeque::with_capacity(block.primitivegroup.len());
        for group in block.primitivegroup {
            if filter.nodes {
                if !group.nodes.is_empty() {
                    groups.push_back(GroupCursor::Nodes(group.nodes.into_iter()));
                }
                if let Some(dense) = group.dense {
                    groups.push_back(GroupCursor::Dense(DenseCursor::new(dense, position)?));
                }
            }
            if filter.ways && !group.ways.is_empty() {
                groups.push_back(GroupCursor::Ways(group.ways.into_iter()));
            }
            if filter.relations && !group.relations.is_empty() {
                groups.push_back(GroupCursor::Relations(group.relations.into_iter()));
            }
        }

        Ok(Self {
            strings: block
                .stringtable
                .s
                .into_iter()
                .map(|s| s.into_owned())
                .collect(),
            granularity: i64::from(block.granularity),
            lat_offset: block.lat_offset,
            lon_offset: block.lon_offset,
            date_granularity: i64::from(block.date_granularity),
            position,
            groups,
        })
    }

    fn next_entity(&mut self) -> Result<Option<Entity>, DecodeError> {
        loop {
            let Some(group) = self.groups.front_mut() else {
                return Ok(None);
            };
            let next = match group {
                GroupCursor::Nodes(nodes) => nodes.next().map(Element::Node),
                GroupCursor::Dense(dense) => dense.next_raw(),
                GroupCursor::Ways(ways) => ways.next().map(Element::Way),
                GroupCursor::Relations(relations) => relations.next().map(Element::Relation),
            };
            match next {
                Some(element) => return self.materialize(element).map(Some),
                None => {
                    self.groups.pop_front();
                }
            }
        }
    }

    fn materialize(&self, element: Element) -> Result<Entity, DecodeError> {
        match element {
            Element::Node(node) => {
                let info = self.info(EntityKind::Node, node.id, RawInfo::from_info(node.info.as_ref()))?;
                let tags = self.tags(EntityKind::Node, node.id, &node.keys, &node.vals)?;
                let location = self.location(&info, node.lat, node.lon)?;
                Ok(Entity::Node(Node {
                    info,
                    tags,
                    location,
                }))
            }
            Element::Dense(dense) => {
                let info = self.info(EntityKind::Node, dense.id, dense.info)?;
                let mut tags = Tags::new();
                for (key, value) in dense.tags {
                    let key = self.string(i64::from(key))?;
                    let value = self.string(i64::from(value))?;
                    self.insert_tag(&mut tags, EntityKind::Node, dense.id, key, value)?;
                }
                let location = self.location(&info, dense.lat, dense.lon)?;
                Ok(Entity::Node(Node {
                    info,
                    tags,
                    location,
                }))
            }
            Element::Way(way) => {
                let info = self.info(EntityKind::Way, way.id, RawInfo::from_info(way.info.as_ref()))?;
                let tags = self.tags(EntityKind::Way, way.id, &way.keys, &way.vals)?;
                Ok(Entity::Way(Way {
                    info,
                    tags,
                    nodes: NodeRefs::from_ids(delta_decoded(&way.refs)),
                }))
            }
            Element::Relation(relation) => {
                let info = self.info(
                    EntityKind::Relation,
                    relation.id,
                    RawInfo::from_info(relation.info.as_ref()),
                )?;
                let tags = self.tags(EntityKind::Relation, relation.id, &relation.keys, &relation.vals)?;
                let members = self.members(&relation)?;
                Ok(Entity::Relation(Relation {
                    info,
                    tags,
                    members,
                }))
            }
        }
    }

    fn info(&self, kind: EntityKind, id: i64, raw: RawInfo) -> Result<Info, DecodeError> {
        let version = u32::try_from(raw.version)
            .ok()
            .filter(|&v| v >= 1)
            .ok_or(DecodeError::InvalidVersion {
                kind,
                id,
                version: raw.version,
                position: self.position,
            })?;
        let millis = raw.timestamp.saturating_mul(self.date_granularity);

        Ok(Info {
            id,
            version,
            visible: raw.visible,
            changeset: raw.changeset,
            timestamp: millis.div_euclid(1000),
            user: self.string(raw.user_sid)?,
            uid: raw.uid,
        })
    }

    fn string(&self, index: i64) -> Result<String, DecodeError> {
        let bytes = usize::try_from(index)
            .ok()
            .and_then(|i| self.strings.get(i))
            .ok_or(DecodeError::StringIndex {
                index,
                size: self.strings.len(),
                position: self.position,
            })?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| DecodeError::Pbf {
                position: self.position,
                message: format!("string table entry {} is not UTF-8: {}", index, e),
            })
    }

    fn tags(&self, kind: EntityKind, id: i64, keys: &[u32], vals: &[u32]) -> Result<Tags, DecodeError> {
        if keys.len() != vals.len() {
            return Err(DecodeError::Pbf {
                position: self.position,
                message: format!("{} {} has {} tag keys but {} values", kind, id, keys.len(), vals.len()),
            });
        }
        let mut tags = Tags::new();
        for (&key, &value) in keys.iter().zip(vals) {
            let key = self.string(i64::from(key))?;
            let value = self.string(i64::from(value))?;
            self.insert_tag(&mut tags, kind, id, key, value)?;
        }
        Ok(tags)
    }

    fn insert_tag(
        &self,
        tags: &mut Tags,
        kind: EntityKind,
        id: i64,
        key: String,
        value: String,
    ) -> Result<(), DecodeError> {
        tags.insert(key, value)
            .map_err(|(key, _)| DecodeError::DuplicateTag {
                kind,
                id,
                key,
                position: self.position,
            })
    }

    // Deleted nodes carry placeholder coordinates in PBF; they are dropped.
    fn location(&self, info: &Info, lat: i64, lon: i64) -> Result<Option<Location>, DecodeError> {
        if !info.visible {
            return Ok(None);
        }
        Ok(Some(Location {
            lon: self.degrees(lon, self.lon_offset)?,
            lat: self.degrees(lat, self.lat_offset)?,
        }))
    }

    fn degrees(&self, value: i64, offset: i64) -> Result<f64, DecodeError> {
        let nanodegrees = self
            .granularity
            .checked_mul(value)
            .and_then(|v| v.checked_add(offset))
            .ok_or(DecodeError::Pbf {
                position: self.position,
                message: format!("coordinate {} overflows", value),
            })?;
        Ok(nanodegrees as f64 / 1e9)
    }

    fn members(&self, relation: &osmformat::Relation) -> Result<Members, DecodeError> {
        let len = relation.memids.len();
        if relation.roles_sid.len() != len || relation.types.len() != len {
            return Err(DecodeError::Pbf {
                position: self.position,
                message: format!("relation {} has member columns of different lengths", relation.id),
            });
        }
        let ids = delta_decoded(&relation.memids);
        let mut members = Vec::with_capacity(len);
        for ((id, &role), member_type) in ids.into_iter().zip(&relation.roles_sid).zip(&relation.types) {
            let kind = match member_type {
                MemberType::NODE => EntityKind::Node,
                MemberType::WAY => EntityKind::Way,
                MemberType::RELATION => EntityKind::Relation,
            };
            members.push(Member::new(kind, id, self.string(i64::from(role))?));
        }
        Ok(Members::from_members(members))
    }
}

/// One undecoded record taken from a group.
enum Element {
    Node(osmformat::Node),
    Dense(DenseElement),
    Way(osmformat::Way),
    Relation(osmformat::Relation),
}

/// A dense node with its delta columns already resolved.
struct DenseElement {
    id: i64,
    lat: i64,
    lon: i64,
    info: RawInfo,
    tags: Vec<(i32, i32)>,
}

// --------------------------- DENSE_NODE ---------------------------

/// Walks the parallel columns of a `DenseNodes` group.
struct DenseCursor {
    nodes: DenseNodes,
    index: usize,
    kv_pos: usize,
    id: DeltaCursor,
    lat: DeltaCursor,
    lon: DeltaCursor,
    timestamp: DeltaCursor,
    changeset: DeltaCursor,
    uid: DeltaCursor,
    user_sid: DeltaCursor,
}

impl DenseCursor {
    fn new(nodes: DenseNodes, position: u64) -> Result<Self, DecodeError> {
        let len = nodes.id.len();
        let mismatch = |column: &str, found: usize| DecodeError::Pbf {
            position,
            message: format!("dense node column `{}` has {} entries, expected {}", column, found, len),
        };
        if nodes.lat.len() != len {
            return Err(mismatch("lat", nodes.lat.len()));
        }
        if nodes.lon.len() != len {
            return Err(mismatch("lon", nodes.lon.len()));
        }
        if let Some(info) = &nodes.denseinfo {
            let columns = [
                ("version", info.version.len()),
                ("timestamp", info.timestamp.len()),
                ("changeset", info.changeset.len()),
                ("uid", info.uid.len()),
                ("user_sid", info.user_sid.len()),
            ];
            for (column, found) in columns {
                if found != len {
                    return Err(mismatch(column, found));
                }
            }
            // Files without history omit the visibility column.
            if !info.visible.is_empty() && info.visible.len() != len {
                return Err(mismatch("visible", info.visible.len()));
            }
        }

        Ok(Self {
            nodes,
            index: 0,
            kv_pos: 0,
            id: DeltaCursor::default(),
            lat: DeltaCursor::default(),
            lon: DeltaCursor::default(),
            timestamp: DeltaCursor::default(),
            changeset: DeltaCursor::default(),
            uid: DeltaCursor::default(),
            user_sid: DeltaCursor::default(),
        })
    }

    fn next_raw(&mut self) -> Option<Element> {
        let i = self.index;
        if i == self.nodes.id.len() {
            return None;
        }
        self.index += 1;

        let id = self.id.advance(self.nodes.id[i]);
        let lat = self.lat.advance(self.nodes.lat[i]);
        let lon = self.lon.advance(self.nodes.lon[i]);

        let info = match &self.nodes.denseinfo {
            Some(info) => RawInfo {
                version: i64::from(info.version[i]),
                timestamp: self.timestamp.advance(info.timestamp[i]),
                changeset: self.changeset.advance(info.changeset[i]),
                uid: self.uid.advance(i64::from(info.uid[i])),
                user_sid: self.user_sid.advance(i64::from(info.user_sid[i])),
                visible: info.visible.get(i).copied().unwrap_or(true),
            },
            None => RawInfo::from_info(None),
        };

        // keys_vals looks like [k, v, k, v, ..., 0, k, v, ..., 0, ...]
        let keys_vals = &self.nodes.keys_vals;
        let mut tags = Vec::new();
        while self.kv_pos + 1 < keys_vals.len() && keys_vals[self.kv_pos] != 0 {
            tags.push((keys_vals[self.kv_pos], keys_vals[self.kv_pos + 1]));
            self.kv_pos += 2;
        }
        // skip terminating zero
        self.kv_pos += 1;

        Some(Element::Dense(DenseElement {
            id,
            lat,
            lon,
            info,
            tags,
        }))
    }
}
