use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat};
use osmstream::{
    access::{call_nodes, call_tags, Arg, NodesReply, TagsReply},
    AccessErrorKind, Counts, ElementFilter, Entity, EntityKind, Handler, Node, OsmObject,
    OsmReader, Relation, Way,
};

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/data/winthrop.osm")
}

fn read_all(filter: ElementFilter) -> Vec<Entity> {
    OsmReader::from_path(fixture())
        .unwrap()
        .with_filter(filter)
        .entities()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

fn first_node() -> Node {
    read_all(ElementFilter::only(EntityKind::Node))[0]
        .as_node()
        .cloned()
        .unwrap()
}

fn first_way() -> Way {
    read_all(ElementFilter::only(EntityKind::Way))[0]
        .as_way()
        .cloned()
        .unwrap()
}

fn first_relation() -> Relation {
    read_all(ElementFilter::only(EntityKind::Relation))[0]
        .as_relation()
        .cloned()
        .unwrap()
}

#[test]
fn node_filter_yields_only_nodes_in_order() {
    let entities = read_all(ElementFilter::only(EntityKind::Node));
    let ids: Vec<i64> = entities
        .iter()
        .map(|entity| {
            assert_eq!(entity.kind(), EntityKind::Node);
            entity.id()
        })
        .collect();
    assert_eq!(
        ids,
        [
            50031066, 50253600, 50253602, 50253603, 50253605, 50253607, 50253608, 1451896744
        ]
    );
}

#[test]
fn header_from_osm_element() {
    let stream = OsmReader::from_path(fixture()).unwrap().entities().unwrap();
    let header = stream.header();
    assert_eq!(header.generator.as_deref(), Some("osmconvert 0.7T"));
    assert_eq!(header.bounds.len(), 1);
    assert_eq!(header.bounds[0].min_lat, 48.44);
    assert_eq!(header.bounds[0].max_lon, -120.15);
}

#[test]
fn node_attributes() {
    let node = first_node();
    assert_eq!(node.id(), 50031066);
    assert!(node.visible());
    assert_eq!(node.version(), 2);
    assert_eq!(node.changeset(), 3137735);
    assert_eq!(node.user(), "woodpeck_fixbot");
    assert_eq!(node.uid(), 147510);
    assert_eq!(node.timestamp_seconds_since_epoch(), 1258416656);
    assert_eq!(node.timestamp().to_string(), "2009-11-17T00:10:56.000Z");
    assert_eq!(node.lon(), Ok(-120.1891610));
    assert_eq!(node.lat(), Ok(48.4655800));
}

#[test]
fn way_attributes() {
    let way = first_way();
    assert_eq!(way.id(), 6091729);
    assert!(way.visible());
    assert_eq!(way.version(), 1);
    assert_eq!(way.changeset(), 417421);
    assert_eq!(way.user(), "DaveHansenTiger");
    assert_eq!(way.uid(), 7168);
    assert_eq!(way.timestamp_seconds_since_epoch(), 1189655636);
    assert_eq!(way.timestamp().to_string(), "2007-09-13T03:53:56.000Z");
}

#[test]
fn relation_attributes() {
    let relation = first_relation();
    assert_eq!(relation.id(), 237891);
    assert!(relation.visible());
    assert_eq!(relation.version(), 2);
    assert_eq!(relation.changeset(), 15155909);
    assert_eq!(relation.user(), "Jano John Akim Franke");
    assert_eq!(relation.uid(), 42191);
    assert_eq!(relation.timestamp_seconds_since_epoch(), 1361751094);
    assert_eq!(relation.timestamp().to_string(), "2013-02-25T00:11:34.000Z");

    let members = relation.members().unwrap();
    assert_eq!(members.len(), 3);
    assert_eq!(members[0].kind(), EntityKind::Way);
    assert_eq!(members[0].id(), 6091729);
    assert_eq!(members[2].role(), "stop");
}

#[test]
fn object_without_tags() {
    let node = first_node();
    match call_tags(node.tags(), &[]).unwrap() {
        TagsReply::Map(tags) => assert!(tags.is_empty()),
        other => panic!("unexpected reply {:?}", other),
    }
    for _ in 0..2 {
        assert_eq!(
            call_tags(node.tags(), &[Arg::Str("foobar")]),
            Ok(TagsReply::Value(None))
        );
    }
}

#[test]
fn tags_on_object() {
    let way = first_way();
    let tags = way.tags();
    assert_eq!(tags.get("name"), Some("National Fish Hatchery Entranc"));
    assert_eq!(tags.get("foobar"), None);
    assert_eq!(
        call_tags(tags, &[Arg::Str("highway")]),
        Ok(TagsReply::Value(Some("residential")))
    );
    assert_eq!(
        call_tags(tags, &[Arg::Str("foobar")]),
        Ok(TagsReply::Value(None))
    );

    let err = call_tags(tags, &[Arg::Other("object")]).unwrap_err();
    assert_eq!(err.kind(), AccessErrorKind::Type);
    let err = call_tags(tags, &[Arg::Str("foo"), Arg::Str("bar")]).unwrap_err();
    assert_eq!(err.kind(), AccessErrorKind::Type);
}

#[test]
fn nodes_on_ways() {
    let way = first_way();
    assert_eq!(way.nodes_count(), 6);
    let refs = way.nodes().unwrap();
    assert_eq!(refs.len(), 6);
    assert_eq!(refs[0], 50253600);
    assert_eq!(refs[5], 50253608);
    assert_eq!(call_nodes(&way, &[Arg::Number(0.0)]), Ok(NodesReply::Ref(50253600)));
    assert_eq!(call_nodes(&way, &[Arg::Number(5.0)]), Ok(NodesReply::Ref(50253608)));

    let err = call_nodes(&way, &[Arg::Number(6.0)]).unwrap_err();
    assert_eq!(err.kind(), AccessErrorKind::Range);
    let err = call_nodes(&way, &[Arg::Str("foo")]).unwrap_err();
    assert_eq!(err.kind(), AccessErrorKind::Type);
    let err = call_nodes(&way, &[Arg::Number(1.0), Arg::Str("bar")]).unwrap_err();
    assert_eq!(err.kind(), AccessErrorKind::Type);
}

#[test]
fn timestamps_match_chrono() {
    for entity in read_all(ElementFilter::all()) {
        let seconds = entity.timestamp_seconds_since_epoch();
        let expected = DateTime::from_timestamp(seconds, 0)
            .unwrap()
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        assert_eq!(entity.timestamp().to_string(), expected, "{} {}", entity.kind(), entity.id());
        assert_eq!(entity.timestamp(), entity.timestamp());
    }
}

#[test]
fn handler_receives_each_kind() {
    let mut nodes = Vec::new();
    let mut ways = Vec::new();
    let mut relations = 0;
    let counts = {
        let mut handler = Handler::new();
        handler
            .on_node(|node| nodes.push(node.id()))
            .on_way(|way| ways.push(way.nodes_count()))
            .on_relation(|_| relations += 1);
        OsmReader::from_path(fixture())
            .unwrap()
            .apply(&mut handler)
            .unwrap()
    };
    assert_eq!(
        counts,
        Counts {
            nodes: 8,
            ways: 2,
            relations: 1
        }
    );
    assert_eq!(nodes.len(), 8);
    assert_eq!(ways, [6, 2]);
    assert_eq!(relations, 1);
}

#[test]
fn disabled_kinds_are_not_dispatched() {
    let mut ways = 0;
    let counts = {
        let mut handler = Handler::new();
        handler.on_way(|_| ways += 1).on_node(|_| panic!("node filtered out"));
        OsmReader::from_path(fixture())
            .unwrap()
            .with_filter(ElementFilter::from_options(Some(false), None, None))
            .apply(&mut handler)
            .unwrap()
    };
    assert_eq!(counts.total(), 2);
    assert_eq!(ways, 2);
}
