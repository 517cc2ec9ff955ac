//! # Pipeline Scenario Tests
//!
//! End-to-end flows across modules, mirroring how processing stages
//! actually use the persistence layer: pick coordinates per
//! micrograph, stream a growing set between two handles, subset a
//! classification, and walk provenance.

use empipe_core::{
    Item, ItemFilter, ItemId, ItemKind, ItemOrder, ObjectSet, RelationKind, SetFactory,
    SortDirection, StreamParams, StreamPoller, StreamStep, schema::attrs,
};
use tempfile::tempdir;

fn micrograph(filename: &str) -> Item {
    let mut item = Item::new();
    item.set_filename(filename);
    item
}

fn coordinate(mic_id: i64, x: i64, y: i64) -> Item {
    let mut item = Item::new();
    item.set(attrs::MIC_ID, mic_id);
    item.set(attrs::X, x);
    item.set(attrs::Y, y);
    item
}

/// The picking loop: for each micrograph, fetch its coordinates
/// through the `mic_id` index, and verify the per-parent partition
/// covers the whole child set exactly once.
#[test]
fn coordinates_partition_by_micrograph() {
    let temp = tempdir().expect("temp dir");
    let factory = SetFactory::new(temp.path()).expect("factory");

    let mut mics = factory.create_set(ItemKind::Micrograph, "").expect("mics");
    for i in 0..20 {
        mics.append(micrograph(&format!("mic_{i:06}.mrc")));
    }
    mics.write().expect("write");

    let mut coords = factory.create_set(ItemKind::Coordinate, "").expect("coords");
    for i in 0..200i64 {
        coords.append(coordinate(i % 20 + 1, i * 3, i * 5));
    }
    coords.write().expect("write");

    let mut total = 0u64;
    let mic_ids: Vec<ItemId> = mics
        .iter_items()
        .expect("iter mics")
        .map(|r| r.expect("mic").id().expect("id"))
        .collect();
    for mic_id in mic_ids {
        let picked: Vec<Item> = coords
            .iter_where(attrs::MIC_ID, mic_id.value() as i64)
            .expect("lookup")
            .map(|r| r.expect("coord"))
            .collect();
        assert_eq!(picked.len(), 10);
        total += picked.len() as u64;
    }
    assert_eq!(total, coords.size().expect("size"));
}

/// Grouped iteration without an index: order by `mic_id` and cut the
/// stream at parent changes, the pattern extraction stages use when an
/// index is not worth building.
#[test]
fn ordered_iteration_groups_by_parent() {
    let temp = tempdir().expect("temp dir");
    let mut coords = ObjectSet::create(
        empipe_core::SetLocation::file(temp.path().join("coords.redb")),
        ItemKind::Coordinate,
    )
    .expect("create");

    // Parents interleaved on purpose.
    for mic_id in [3i64, 1, 2, 1, 3, 2, 1, 3, 2] {
        coords.append(coordinate(mic_id, 0, 0));
    }
    coords.write().expect("write");

    let mut groups = Vec::new();
    let mut last = None;
    let cursor = coords
        .select(
            ItemFilter::All,
            ItemOrder::Attr(attrs::MIC_ID.to_string()),
            SortDirection::Asc,
        )
        .expect("ordered scan");
    for item in cursor {
        let mic_id = item.expect("coord").get(attrs::MIC_ID).as_int();
        if mic_id != last {
            last = mic_id;
            groups.push((mic_id, 0u64));
        }
        if let Some(group) = groups.last_mut() {
            group.1 += 1;
        }
    }

    let expected: Vec<(Option<i64>, u64)> = vec![(Some(1), 3), (Some(2), 3), (Some(3), 3)];
    assert_eq!(groups, expected);
}

/// Producer and consumer on the same file: the consumer polls the
/// committed tail with a batch size, sleeps on a short tail, and
/// drains on close.
#[test]
fn streaming_between_two_handles() {
    let temp = tempdir().expect("temp dir");
    let location = empipe_core::SetLocation::file(temp.path().join("mics.redb"));

    let mut producer =
        ObjectSet::create(location.clone(), ItemKind::Micrograph).expect("create");
    producer.append(micrograph("a.mrc"));
    producer.append(micrograph("b.mrc"));
    producer.write().expect("write");
    producer.close().expect("close");

    let mut consumer = ObjectSet::open(location.clone()).expect("open");
    let mut poller = StreamPoller::new(StreamParams::default().with_batch_size(2));

    let (step, batch) = poller.poll(&mut consumer, false).expect("poll");
    assert_eq!(step, StreamStep::Process(2));
    assert_eq!(batch.len(), 2);

    // Nothing new yet.
    let (step, _) = poller.poll(&mut consumer, false).expect("poll");
    assert!(matches!(step, StreamStep::Sleep(_)));

    // Producer reopens, appends one more, closes the stream.
    consumer.close().expect("release");
    let mut producer = ObjectSet::open(location.clone()).expect("reopen");
    producer.append(micrograph("c.mrc"));
    producer.close().expect("close");

    let mut consumer = ObjectSet::open(location).expect("open");
    let (step, batch) = poller.poll(&mut consumer, true).expect("poll");
    assert_eq!(step, StreamStep::Process(1));
    assert_eq!(batch[0].get(attrs::FILENAME).as_str(), Some("c.mrc"));

    let (step, _) = poller.poll(&mut consumer, true).expect("poll");
    assert_eq!(step, StreamStep::Finished);
}

/// Deriving an output set from an input: copy the metadata, subset the
/// enabled items keeping their ids, and record provenance.
#[test]
fn subset_with_provenance() {
    let temp = tempdir().expect("temp dir");
    let factory = SetFactory::new(temp.path()).expect("factory");

    let mut input = factory.create_set(ItemKind::Particle, "").expect("input");
    input.set_sampling_rate(1.237).expect("rate");
    for i in 1..=10u64 {
        let mut particle = Item::new();
        particle.set_location(i, "stack.mrcs");
        particle.set_enabled(i % 3 != 0);
        input.append(particle);
    }
    input.write().expect("write");

    let mut output = factory
        .create_set(ItemKind::Particle, "subset")
        .expect("output");
    output.copy_info(&mut input).expect("copy info");
    let picked: Vec<Item> = input
        .iter_enabled()
        .expect("enabled")
        .collect::<Result<_, _>>()
        .expect("items");
    for item in picked {
        output.append(item);
    }
    output.write().expect("write");

    assert_eq!(output.sampling_rate().expect("rate"), Some(1.237));
    assert_eq!(output.size().expect("size"), 7);
    // Ids survive the subset.
    assert!(output.get(ItemId(10)).expect("get").is_some());
    assert!(output.get(ItemId(9)).expect("get").is_none());

    let mut graph = factory.relations().expect("graph");
    graph
        .register_transform(input.location(), output.location())
        .expect("register");
    assert!(graph
        .has_edge(RelationKind::Source, input.location(), output.location())
        .expect("edge"));
    assert_eq!(
        graph.sources_of(output.location()).expect("sources"),
        vec![input.location().clone()]
    );
}

/// File round-trip: items written with distinct locations come back
/// from a fresh handle in insertion order with identical attributes.
#[test]
fn reopened_set_round_trips_items() {
    let temp = tempdir().expect("temp dir");
    let location = empipe_core::SetLocation::file(temp.path().join("parts.redb"));

    let written: Vec<Item> = {
        let mut set = ObjectSet::create(location.clone(), ItemKind::Particle).expect("create");
        for i in 1..=25u64 {
            let mut particle = Item::new();
            particle.set_location(i, format!("stack_{:02}.mrcs", i % 4));
            particle.set(attrs::MIC_ID, (i as i64) % 5);
            set.append(particle);
        }
        set.close().expect("close");
        set.iter_items()
            .expect("iter")
            .collect::<Result<_, _>>()
            .expect("items")
    };

    let mut reopened = ObjectSet::open(location).expect("open");
    let read: Vec<Item> = reopened
        .iter_items()
        .expect("iter")
        .collect::<Result<_, _>>()
        .expect("items");

    assert_eq!(read.len(), 25);
    for (before, after) in written.iter().zip(&read) {
        assert_eq!(before.id(), after.id());
        assert!(before.equal_attributes(after, &[]));
    }
}

/// A full working directory lists every file a stage would need to
/// archive: the set files plus the images the items reference.
#[test]
fn files_of_a_run_are_enumerable() {
    let temp = tempdir().expect("temp dir");
    let factory = SetFactory::new(temp.path()).expect("factory");

    let mut mics = factory.create_set(ItemKind::Micrograph, "").expect("mics");
    mics.append(micrograph("raw/mic_000001.mrc"));
    mics.append(micrograph("raw/mic_000002.mrc"));
    mics.write().expect("write");

    let files = mics.files().expect("files");
    assert_eq!(files.len(), 3);
    assert!(files.iter().any(|p| p.ends_with("micrographs.redb")));
    assert!(files.iter().any(|p| p.ends_with("mic_000002.mrc")));
}
