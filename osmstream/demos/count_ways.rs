// Count the ways and their node references in an .osm or .osm.pbf file

use env_logger::Env;
use osmstream::prelude::*;

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let arg = std::env::args_os()
        .nth(1)
        .expect("need a *.osm or *.osm.pbf file as argument");
    let path = std::path::Path::new(&arg);
    let reader = OsmReader::from_path(path).expect("Invalid file path");

    let mut way_counter = 0;
    let mut ref_counter = 0;
    let mut handler = Handler::new();
    handler.on_way(|way| {
        way_counter += 1;
        ref_counter += way.nodes_count();
    });
    let counts = reader.apply(&mut handler).expect("Reading failed");
    drop(handler);

    assert_eq!(counts.ways, way_counter);
    println!("Ways: {:?}, node references: {:?}", way_counter, ref_counter);
}
