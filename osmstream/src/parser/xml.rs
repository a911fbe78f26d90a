use std::{io, io::BufRead, str::FromStr};

use log::trace;
use quick_xml::{
    events::{BytesStart, Event},
    name::QName,
    reader::Reader,
};

use crate::{
    parser::EntityDecoder, timestamp::parse_iso8601, BoundingBox, DecodeError, ElementFilter,
    Entity, EntityKind, Header, Info, Location, Member, Members, Node, NodeRefs, Relation, Tags,
    Way,
};

/// Entity element seen at the top level but not decoded yet.
struct Pending {
    kind: EntityKind,
    start: BytesStart<'static>,
    empty: bool,
    position: u64,
}

/// Decoder for `.osm` XML, one element per entity.
pub(crate) struct XmlDecoder<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    skip_buf: Vec<u8>,
    header: Header,
    pending: Option<Pending>,
}

impl<R: BufRead + Send> XmlDecoder<R> {
    /// Reads up to the first entity so the header is known before any
    /// entity is requested.
    pub(crate) fn new(source: R) -> Result<Self, DecodeError> {
        let mut reader = Reader::from_reader(source);
        reader.trim_text(true);

        let mut decoder = Self {
            reader,
            buf: Vec::with_capacity(4 * 1024),
            skip_buf: Vec::new(),
            header: Header::default(),
            pending: None,
        };
        decoder.pending = decoder.next_top_level()?;
        Ok(decoder)
    }

    fn position_now(&self) -> u64 {
        self.reader.buffer_position() as u64
    }

    // Advances to the next top-level entity element, consuming header
    // elements and skipping anything else on the way.
    fn next_top_level(&mut self) -> Result<Option<Pending>, DecodeError> {
        loop {
            self.buf.clear();
            let position = self.position_now();
            let event = self
                .reader
                .read_event_into(&mut self.buf)
                .map_err(|e| xml_error(e, position))?;

            let (start, empty) = match event {
                Event::Start(start) => (start, false),
                Event::Empty(start) => (start, true),
                Event::Eof => return Ok(None),
                // Declarations, text, comments and `</osm>`.
                _ => continue,
            };

            let name = start.name();
            if let Some(kind) = EntityKind::from_name(name.as_ref()) {
                return Ok(Some(Pending {
                    kind,
                    start: start.into_owned(),
                    empty,
                    position,
                }));
            }

            match name.as_ref() {
                // Container; its children are the entities.
                b"osm" => {
                    self.header.generator = attribute(&start, b"generator", position)?;
                    continue;
                }
                b"bounds" => self.header.bounds.push(parse_bounds(&start, position)?),
                other => trace!(
                    "skipping <{}> at byte {}",
                    String::from_utf8_lossy(other),
                    position
                ),
            }
            if !empty {
                let name = name.as_ref().to_vec();
                skip_element(&mut self.reader, &name, &mut self.skip_buf, position)?;
            }
        }
    }

    fn decode(&mut self, pending: Pending) -> Result<Entity, DecodeError> {
        let Pending {
            kind,
            start,
            empty,
            position,
        } = pending;
        if !empty {
            ensure_more_input(&mut self.reader, position)?;
        }
        let attrs = EntityAttrs::parse(kind, &start, position)?;
        let info = attrs.info(kind, position)?;

        let mut tags = Tags::new();
        let mut refs = Vec::new();
        let mut members = Vec::new();
        if !empty {
            self.read_children(kind, &info, &mut tags, &mut refs, &mut members)?;
        }

        Ok(match kind {
            EntityKind::Node => {
                let location = attrs.location(&info, position)?;
                Entity::Node(Node {
                    info,
                    tags,
                    location,
                })
            }
            EntityKind::Way => Entity::Way(Way {
                info,
                tags,
                nodes: NodeRefs::from_ids(refs),
            }),
            EntityKind::Relation => Entity::Relation(Relation {
                info,
                tags,
                members: Members::from_members(members),
            }),
        })
    }

    fn read_children(
        &mut self,
        kind: EntityKind,
        info: &Info,
        tags: &mut Tags,
        refs: &mut Vec<i64>,
        members: &mut Vec<Member>,
    ) -> Result<(), DecodeError> {
        loop {
            self.buf.clear();
            let position = self.position_now();
            let event = self
                .reader
                .read_event_into(&mut self.buf)
                .map_err(|e| xml_error(e, position))?;

            let (child, empty) = match event {
                Event::Start(child) => (child, false),
                Event::Empty(child) => (child, true),
                // Every nested start is consumed through its end below, so
                // this closes the entity itself.
                Event::End(_) => return Ok(()),
                Event::Eof => {
                    return Err(DecodeError::Truncated {
                        context: kind.as_str(),
                        position,
                    })
                }
                _ => continue,
            };
            if !empty {
                ensure_more_input(&mut self.reader, position)?;
            }

            match (child.name().as_ref(), kind) {
                (b"tag", _) => {
                    let key = required(&child, "tag", "k", position)?;
                    let value = required(&child, "tag", "v", position)?;
                    if let Err((key, _)) = tags.insert(key, value) {
                        return Err(DecodeError::DuplicateTag {
                            kind,
                            id: info.id,
                            key,
                            position,
                        });
                    }
                }
                (b"nd", EntityKind::Way) => {
                    let id = required(&child, "nd", "ref", position)?;
                    refs.push(parse_value("nd", "ref", &id, position)?);
                }
                (b"member", EntityKind::Relation) => members.push(parse_member(&child, position)?),
                (other, _) => trace!(
                    "skipping <{}> inside {} {}",
                    String::from_utf8_lossy(other),
                    kind,
                    info.id
                ),
            }

            if !empty {
                let name = child.name().as_ref().to_vec();
                skip_element(&mut self.reader, &name, &mut self.skip_buf, position)?;
            }
        }
    }
}

impl<R: BufRead + Send> EntityDecoder for XmlDecoder<R> {
    fn header(&self) -> &Header {
        &self.header
    }

    fn next_entity(&mut self, filter: &ElementFilter) -> Result<Option<Entity>, DecodeError> {
        loop {
            let pending = match self.pending.take() {
                Some(pending) => pending,
                None => match self.next_top_level()? {
                    Some(pending) => pending,
                    None => return Ok(None),
                },
            };

            if filter.accepts(pending.kind) {
                return self.decode(pending).map(Some);
            }
            if !pending.empty {
                let name = pending.start.name().as_ref().to_vec();
                skip_element(&mut self.reader, &name, &mut self.skip_buf, pending.position)?;
            }
        }
    }

    fn position(&self) -> u64 {
        self.position_now()
    }
}

/// Raw metadata attributes of one entity element.
#[derive(Default)]
struct EntityAttrs {
    id: Option<i64>,
    version: Option<i64>,
    visible: Option<bool>,
    changeset: Option<i64>,
    timestamp: Option<i64>,
    user: Option<String>,
    uid: Option<i64>,
    lat: Option<f64>,
    lon: Option<f64>,
}

impl EntityAttrs {
    fn parse(kind: EntityKind, start: &BytesStart<'_>, position: u64) -> Result<Self, DecodeError> {
        let element = kind.as_str();
        let mut attrs = EntityAttrs::default();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| DecodeError::Xml {
                position,
                message: e.to_string(),
            })?;
            let value = attr.unescape_value().map_err(|e| xml_error(e, position))?;
            match attr.key.as_ref() {
                b"id" => attrs.id = Some(parse_value(element, "id", &value, position)?),
                b"version" => {
                    attrs.version = Some(parse_value(element, "version", &value, position)?)
                }
                b"visible" => attrs.visible = Some(parse_bool(element, &value, position)?),
                b"changeset" => {
                    attrs.changeset = Some(parse_value(element, "changeset", &value, position)?)
                }
                b"timestamp" => {
                    let seconds = parse_iso8601(&value).ok_or_else(|| {
                        invalid(element, "timestamp", &value, position)
                    })?;
                    attrs.timestamp = Some(seconds);
                }
                b"user" => attrs.user = Some(value.into_owned()),
                b"uid" => attrs.uid = Some(parse_value(element, "uid", &value, position)?),
                b"lat" if kind == EntityKind::Node => {
                    attrs.lat = Some(parse_value(element, "lat", &value, position)?)
                }
                b"lon" if kind == EntityKind::Node => {
                    attrs.lon = Some(parse_value(element, "lon", &value, position)?)
                }
                _ => {}
            }
        }
        Ok(attrs)
    }

    fn info(&self, kind: EntityKind, position: u64) -> Result<Info, DecodeError> {
        let id = self.id.ok_or(DecodeError::MissingAttribute {
            element: kind.as_str(),
            attribute: "id",
            position,
        })?;
        let raw_version = self.version.unwrap_or(0);
        let version = u32::try_from(raw_version)
            .ok()
            .filter(|&v| v >= 1)
            .ok_or(DecodeError::InvalidVersion {
                kind,
                id,
                version: raw_version,
                position,
            })?;

        Ok(Info {
            id,
            version,
            visible: self.visible.unwrap_or(true),
            changeset: self.changeset.unwrap_or(0),
            timestamp: self.timestamp.unwrap_or(0),
            user: self.user.clone().unwrap_or_default(),
            uid: self.uid.unwrap_or(0),
        })
    }

    fn location(&self, info: &Info, position: u64) -> Result<Option<Location>, DecodeError> {
        match (self.lon, self.lat) {
            (Some(lon), Some(lat)) => Ok(Some(Location { lon, lat })),
            _ if !info.visible => Ok(None),
            (None, _) => Err(DecodeError::MissingAttribute {
                element: "node",
                attribute: "lon",
                position,
            }),
            (Some(_), None) => Err(DecodeError::MissingAttribute {
                element: "node",
                attribute: "lat",
                position,
            }),
        }
    }
}

fn parse_member(start: &BytesStart<'_>, position: u64) -> Result<Member, DecodeError> {
    let kind_name = required(start, "member", "type", position)?;
    let kind = EntityKind::from_name(kind_name.as_bytes())
        .ok_or_else(|| invalid("member", "type", &kind_name, position))?;
    let id = required(start, "member", "ref", position)?;
    let id = parse_value("member", "ref", &id, position)?;
    let role = attribute(start, b"role", position)?.unwrap_or_default();
    Ok(Member::new(kind, id, role))
}

fn parse_bounds(start: &BytesStart<'_>, position: u64) -> Result<BoundingBox, DecodeError> {
    let coordinate = |name: &'static str| -> Result<f64, DecodeError> {
        let value = required(start, "bounds", name, position)?;
        parse_value("bounds", name, &value, position)
    };
    Ok(BoundingBox {
        min_lon: coordinate("minlon")?,
        min_lat: coordinate("minlat")?,
        max_lon: coordinate("maxlon")?,
        max_lat: coordinate("maxlat")?,
    })
}

/// Unescaped value of attribute `name`, if present.
fn attribute(
    start: &BytesStart<'_>,
    name: &[u8],
    position: u64,
) -> Result<Option<String>, DecodeError> {
    for attr in start.attributes() {
        let attr = attr.map_err(|e| DecodeError::Xml {
            position,
            message: e.to_string(),
        })?;
        if attr.key.as_ref() == name {
            let value = attr.unescape_value().map_err(|e| xml_error(e, position))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn required(
    start: &BytesStart<'_>,
    element: &'static str,
    name: &'static str,
    position: u64,
) -> Result<String, DecodeError> {
    attribute(start, name.as_bytes(), position)?.ok_or(DecodeError::MissingAttribute {
        element,
        attribute: name,
        position,
    })
}

fn parse_value<T: FromStr>(
    element: &'static str,
    attribute: &'static str,
    value: &str,
    position: u64,
) -> Result<T, DecodeError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(element, attribute, value, position))
}

fn parse_bool(element: &'static str, value: &str, position: u64) -> Result<bool, DecodeError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(invalid(element, "visible", value, position)),
    }
}

fn invalid(element: &'static str, attribute: &'static str, value: &str, position: u64) -> DecodeError {
    DecodeError::InvalidAttribute {
        element,
        attribute,
        value: value.to_string(),
        position,
    }
}

fn skip_element<R: BufRead>(
    reader: &mut Reader<R>,
    name: &[u8],
    buf: &mut Vec<u8>,
    position: u64,
) -> Result<(), DecodeError> {
    buf.clear();
    reader
        .read_to_end_into(QName(name), buf)
        .map(|_| ())
        .map_err(|e| xml_error(e, position))
}

// A start tag with nothing after it was cut off, possibly mid-attribute.
fn ensure_more_input<R: BufRead>(reader: &mut Reader<R>, position: u64) -> Result<(), DecodeError> {
    let rest = reader
        .get_mut()
        .fill_buf()
        .map_err(|e| DecodeError::io(e, position))?;
    if rest.is_empty() {
        return Err(DecodeError::Truncated {
            context: "element",
            position,
        });
    }
    Ok(())
}

fn xml_error(err: quick_xml::Error, position: u64) -> DecodeError {
    match err {
        quick_xml::Error::UnexpectedEof(_) => DecodeError::Truncated {
            context: "element",
            position,
        },
        quick_xml::Error::Io(err) => {
            DecodeError::io(io::Error::new(err.kind(), err.to_string()), position)
        }
        err => DecodeError::Xml {
            position,
            message: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OsmObject;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6" generator="test-writer 1.0">
  <bounds minlat="48.40" minlon="-120.20" maxlat="48.50" maxlon="-120.10"/>
  <changeset id="1" user="x"><tag k="created_by" v="JOSM"/></changeset>
  <node id="1" version="2" changeset="3" timestamp="2009-11-17T00:10:56Z" user="a" uid="4" lat="48.5" lon="-120.25"/>
  <node id="2" version="1" lat="1" lon="2">
    <tag k="amenity" v="cafe &amp; bar"/>
    <note>ignored</note>
  </node>
  <way id="10" version="1" timestamp="2007-09-13T03:53:56Z">
    <nd ref="1"/>
    <nd ref="2"/>
    <tag k="highway" v="residential"/>
  </way>
  <relation id="20" version="3">
    <member type="way" ref="10" role="outer"/>
    <member type="node" ref="1"/>
    <tag k="type" v="multipolygon"/>
  </relation>
</osm>
"#;

    fn decode_all(xml: &str, filter: ElementFilter) -> Result<Vec<Entity>, DecodeError> {
        let mut decoder = XmlDecoder::new(xml.as_bytes())?;
        let mut entities = Vec::new();
        while let Some(entity) = decoder.next_entity(&filter)? {
            entities.push(entity);
        }
        Ok(entities)
    }

    fn first_error(xml: &str) -> DecodeError {
        decode_all(xml, ElementFilter::all()).unwrap_err()
    }

    #[test]
    fn test_decodes_entities_in_order() {
        let entities = decode_all(SAMPLE, ElementFilter::all()).unwrap();
        let ids: Vec<(EntityKind, i64)> = entities.iter().map(|e| (e.kind(), e.id())).collect();
        assert_eq!(
            ids,
            [
                (EntityKind::Node, 1),
                (EntityKind::Node, 2),
                (EntityKind::Way, 10),
                (EntityKind::Relation, 20)
            ]
        );

        let node = entities[0].as_node().unwrap();
        assert_eq!(node.version(), 2);
        assert_eq!(node.changeset(), 3);
        assert_eq!(node.timestamp_seconds_since_epoch(), 1258416656);
        assert_eq!(node.user(), "a");
        assert_eq!(node.uid(), 4);
        assert_eq!(node.lat(), Ok(48.5));
        assert_eq!(node.lon(), Ok(-120.25));
        assert!(node.tags().is_empty());

        let cafe = entities[1].as_node().unwrap();
        assert_eq!(cafe.tags().get("amenity"), Some("cafe & bar"));
        assert_eq!(cafe.changeset(), 0);
        assert_eq!(cafe.user(), "");
        assert_eq!(cafe.timestamp_seconds_since_epoch(), 0);

        let way = entities[2].as_way().unwrap();
        assert_eq!(way.nodes().unwrap().as_slice(), [1, 2]);
        assert_eq!(way.tags().get("highway"), Some("residential"));

        let relation = entities[3].as_relation().unwrap();
        let members = relation.members().unwrap();
        assert_eq!(members[0], Member::new(EntityKind::Way, 10, "outer"));
        assert_eq!(members[1], Member::new(EntityKind::Node, 1, ""));
    }

    #[test]
    fn test_reads_header() {
        let decoder = XmlDecoder::new(SAMPLE.as_bytes()).unwrap();
        let header = decoder.header();
        assert_eq!(header.generator.as_deref(), Some("test-writer 1.0"));
        assert_eq!(
            header.bounds,
            [BoundingBox {
                min_lon: -120.20,
                min_lat: 48.40,
                max_lon: -120.10,
                max_lat: 48.50,
            }]
        );
    }

    #[test]
    fn test_filter_skips_disabled_kinds() {
        let ways = decode_all(SAMPLE, ElementFilter::only(EntityKind::Way)).unwrap();
        assert_eq!(ways.len(), 1);
        assert_eq!(ways[0].id(), 10);

        let none = decode_all(SAMPLE, ElementFilter::none()).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_disabled_records_are_not_parsed() {
        let xml = r#"<osm>
  <way id="1" version="1"><nd ref="x"/><tag k="a" v="b"/><tag k="a" v="c"/></way>
  <node id="2" version="1" lat="0" lon="0"/>
</osm>"#;
        let nodes = decode_all(xml, ElementFilter::only(EntityKind::Node)).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id(), 2);

        assert!(matches!(
            first_error(xml),
            DecodeError::InvalidAttribute {
                element: "nd",
                attribute: "ref",
                ..
            }
        ));
    }

    #[test]
    fn test_deleted_entities() {
        let xml = r#"<osm>
  <node id="5" version="3" visible="false"/>
  <way id="6" version="2" visible="false"/>
</osm>"#;
        let entities = decode_all(xml, ElementFilter::all()).unwrap();
        let node = entities[0].as_node().unwrap();
        assert!(!node.visible());
        assert_eq!(node.location(), None);
        assert!(node.lon().is_err());
        let way = entities[1].as_way().unwrap();
        assert_eq!(way.nodes_count(), 0);
        assert!(way.nodes().is_err());
    }

    #[test]
    fn test_missing_end_of_document_is_clean() {
        let xml = r#"<osm><node id="1" version="1" lat="0" lon="0"/>"#;
        assert_eq!(decode_all(xml, ElementFilter::all()).unwrap().len(), 1);
    }

    #[test]
    fn test_truncated_record() {
        let xml = r#"<osm><way id="1" version="1"><nd ref="1"/>"#;
        assert!(matches!(
            first_error(xml),
            DecodeError::Truncated { context: "way", .. }
        ));

        let xml = r#"<osm><node id="1" version="1" lat="0" lon="0"><tag k="a" v="b"/>"#;
        assert!(matches!(
            first_error(xml),
            DecodeError::Truncated { context: "node", .. }
        ));
    }

    #[test]
    fn test_cut_inside_start_tag() {
        let xml = r#"<osm><node id="1" version="1" lat="0" lon="0"/><node id="2" vers"#;
        for filter in [ElementFilter::all(), ElementFilter::only(EntityKind::Way)] {
            let err = decode_all(xml, filter).unwrap_err();
            assert!(
                matches!(err, DecodeError::Truncated { context: "element", .. }),
                "{:?}",
                err
            );
        }

        let xml = r#"<osm><way id="1" version="1"><nd ref="1"/><nd re"#;
        assert!(matches!(
            first_error(xml),
            DecodeError::Truncated { context: "element", .. }
        ));
    }

    #[test]
    fn test_invalid_version() {
        let err = first_error(r#"<osm><node id="7" lat="0" lon="0"/></osm>"#);
        assert_eq!(
            err,
            DecodeError::InvalidVersion {
                kind: EntityKind::Node,
                id: 7,
                version: 0,
                position: 5,
            }
        );
        let err = first_error(r#"<osm><way id="7" version="-2"/></osm>"#);
        assert!(matches!(err, DecodeError::InvalidVersion { version: -2, .. }));
    }

    #[test]
    fn test_duplicate_tag() {
        let xml = r#"<osm><way id="9" version="1"><tag k="a" v="1"/><tag k="a" v="2"/></way></osm>"#;
        assert!(matches!(
            first_error(xml),
            DecodeError::DuplicateTag { id: 9, ref key, .. } if key == "a"
        ));
    }

    #[test]
    fn test_malformed_attributes() {
        let err = first_error(r#"<osm><node id="x" version="1" lat="0" lon="0"/></osm>"#);
        assert!(matches!(
            err,
            DecodeError::InvalidAttribute { attribute: "id", .. }
        ));

        let err = first_error(r#"<osm><node id="1" version="1" lat="0"/></osm>"#);
        assert!(matches!(
            err,
            DecodeError::MissingAttribute { attribute: "lon", .. }
        ));

        let err = first_error(r#"<osm><relation id="1" version="1"><member type="area" ref="1"/></relation></osm>"#);
        assert!(matches!(
            err,
            DecodeError::InvalidAttribute { attribute: "type", .. }
        ));

        let err = first_error(r#"<osm><node id="1" version="1" lat="0" lon="0" timestamp="yesterday"/></osm>"#);
        assert!(matches!(
            err,
            DecodeError::InvalidAttribute { attribute: "timestamp", .. }
        ));
    }

    #[test]
    fn test_mismatched_end_tag() {
        let err = first_error(r#"<osm><way id="1" version="1"><nd ref="1"></way></osm>"#);
        assert!(matches!(err, DecodeError::Xml { .. }));
    }
}
