// Print the header and the first few entities of an OSM file

use env_logger::Env;
use osmstream::prelude::*;

const LIMIT: usize = 5;

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("debug")).init();

    let arg = std::env::args_os()
        .nth(1)
        .expect("need an OSM file as argument");
    let mut stream = OsmReader::from_path(std::path::Path::new(&arg))
        .expect("Invalid file path")
        .entities()
        .expect("Could not read header");

    println!("{:?}", stream.header());
    for entity in stream.by_ref().take(LIMIT) {
        let entity = match entity {
            Ok(entity) => entity,
            Err(err) => {
                eprintln!("{}", err);
                std::process::exit(1);
            }
        };
        println!(
            "{} {} v{} by {:?} at {}",
            entity.kind(),
            entity.id(),
            entity.version(),
            entity.user(),
            entity.timestamp()
        );
        for (key, value) in entity.tags().iter() {
            println!("  {} = {}", key, value);
        }
        match &entity {
            Entity::Node(node) => match node.location() {
                Some(location) => println!("  at {}, {}", location.lat, location.lon),
                None => println!("  deleted"),
            },
            Entity::Way(way) => println!("  {} node references", way.nodes_count()),
            Entity::Relation(relation) => {
                if let Ok(members) = relation.members() {
                    for member in members.iter() {
                        println!("  {} {} as {:?}", member.kind(), member.id(), member.role());
                    }
                }
            }
        }
    }
    stream.close();
}
