// End-to-end append scenarios driven through the public surface, with a
// reader-style scanner verifying what lands in the shared log.
use std::time::Duration;

use tempfile::TempDir;

use termlog::api::{
    BufferClaim, Conductor, CountersFile, LogBuffers, LogOptions, OwnedPosition, Publication,
    ADMIN_ACTION, BACK_PRESSURED,
};
use termlog::core::buffer::AtomicBuffer;
use termlog::core::{frame, layout};

const MTU_LENGTH: usize = 4096;
const MAX_PAYLOAD: usize = MTU_LENGTH - frame::HEADER_LENGTH;
const INITIAL_TERM_ID: i32 = 1;

struct Harness {
    dir: TempDir,
    conductor: Conductor,
    counters: CountersFile,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let counters =
            CountersFile::create(dir.path().join("counters.termlog"), 1).expect("counters");
        Self {
            dir,
            conductor: Conductor::new(Duration::from_millis(5_000)),
            counters,
        }
    }

    fn publication(&self, term_length: usize) -> (Publication, OwnedPosition, LogBuffers) {
        let path = self.dir.path().join("stream.termlog");
        let log = LogBuffers::create(
            &path,
            LogOptions::new(term_length, MTU_LENGTH)
                .with_initial_term_id(INITIAL_TERM_ID)
                .with_session_id(200)
                .with_stream_id(10),
        )
        .expect("log");
        // A second mapping of the same file plays the observer role.
        let observer = LogBuffers::open(&path).expect("observer mapping");

        let limit = self.counters.writer(0).expect("limit writer");
        let reader = self.counters.reader(0).expect("limit reader");
        let publication = Publication::new(
            self.conductor.handle(),
            "shm:stream?id=10",
            7,
            reader,
            log,
        );
        (publication, limit, observer)
    }
}

#[derive(Debug)]
struct ScannedFrame {
    term_offset: usize,
    frame_length: usize,
    frame_type: u16,
    flags: u8,
    term_id: i32,
    reserved_value: i64,
    payload: Vec<u8>,
}

/// Walk published frames from the start of a term the way a subscriber does:
/// stop at the first zero frame-length.
fn scan_term(term: &AtomicBuffer) -> Vec<ScannedFrame> {
    let mut frames = Vec::new();
    let mut offset = 0;
    while offset < term.capacity() {
        let frame_length = frame::frame_length_volatile(term, offset);
        if frame_length <= 0 {
            break;
        }
        let frame_length = frame_length as usize;
        let payload = term
            .bytes_at(offset + frame::HEADER_LENGTH, frame_length - frame::HEADER_LENGTH)
            .to_vec();
        frames.push(ScannedFrame {
            term_offset: offset,
            frame_length,
            frame_type: frame::frame_type(term, offset),
            flags: frame::frame_flags(term, offset),
            term_id: frame::frame_term_id(term, offset),
            reserved_value: frame::reserved_value(term, offset),
            payload,
        });
        offset += frame::align_frame_length(frame_length);
    }
    frames
}

fn aligned(message_length: usize) -> usize {
    frame::align_frame_length(frame::HEADER_LENGTH + message_length)
}

#[test]
fn tripped_term_pads_rotates_and_retries_on_the_next_term() {
    let harness = Harness::new();
    let term_length = layout::TERM_MIN_LENGTH;
    let (publication, limit, observer) = harness.publication(term_length);
    limit.set_ordered(i64::MAX);

    // Fill the first term up to 60 KiB with maximum-payload frames.
    let filler = vec![0x11u8; MAX_PAYLOAD];
    for _ in 0..15 {
        assert!(publication.offer(&filler).expect("offer") > 0);
    }
    assert_eq!(publication.position(), 15 * MTU_LENGTH as i64);

    // A 5000-byte message needs 5088 bytes; only 4096 remain in the term.
    let message = vec![0x22u8; 5000];
    assert_eq!(publication.offer(&message).expect("offer"), ADMIN_ACTION);

    let first_term = scan_term(&observer.term_buffer(0));
    let pad = first_term.last().expect("pad frame");
    assert_eq!(pad.frame_type, frame::HDR_TYPE_PAD);
    assert_eq!(pad.term_offset, 15 * MTU_LENGTH);
    assert_eq!(pad.frame_length, term_length - 15 * MTU_LENGTH);

    // The retry lands at offset zero of the next term.
    let required = MTU_LENGTH + aligned(5000 - MAX_PAYLOAD);
    let position = publication.offer(&message).expect("offer");
    assert_eq!(position, (term_length + required) as i64);

    let second_term = scan_term(&observer.term_buffer(1));
    assert_eq!(second_term[0].term_offset, 0);
    assert_eq!(second_term[0].term_id, INITIAL_TERM_ID + 1);
    assert_eq!(second_term[0].flags, frame::BEGIN_FRAG);
    assert_eq!(second_term[1].flags, frame::END_FRAG);
}

#[test]
fn back_pressure_lifts_when_the_driver_advances_the_limit() {
    let harness = Harness::new();
    let (publication, limit, observer) = harness.publication(layout::TERM_MIN_LENGTH);
    observer.meta_data().set_is_connected_ordered(true);
    limit.set_ordered(i64::MAX);

    let position = publication.offer(&[0x33u8; 500]).expect("offer");
    limit.set_ordered(position);

    assert_eq!(publication.offer(&[0x33u8; 8]).expect("offer"), BACK_PRESSURED);

    limit.set_ordered(position + 4096);
    let next = publication.offer(&[0x44u8; 4000]).expect("offer");
    assert_eq!(next, position + aligned(4000) as i64);
}

#[test]
fn aborted_claim_reads_as_padding_and_the_stream_moves_past_it() {
    let harness = Harness::new();
    let (publication, limit, observer) = harness.publication(layout::TERM_MIN_LENGTH);
    limit.set_ordered(i64::MAX);

    let mut claim = BufferClaim::new();
    assert!(publication.try_claim(200, &mut claim).expect("claim") > 0);
    claim.abort().expect("abort");

    let position = publication.offer(&[0x55u8; 64]).expect("offer");
    assert_eq!(position, (aligned(200) + aligned(64)) as i64);

    let frames = scan_term(&observer.term_buffer(0));
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].frame_type, frame::HDR_TYPE_PAD);
    assert_eq!(frames[0].frame_length, frame::HEADER_LENGTH + 200);
    assert_eq!(frames[1].term_offset, aligned(200));
    assert_eq!(frames[1].frame_type, frame::HDR_TYPE_DATA);
    assert_eq!(frames[1].payload, vec![0x55u8; 64]);
}

#[test]
fn large_messages_fragment_into_a_begin_mid_end_chain() {
    let harness = Harness::new();
    let (publication, limit, observer) = harness.publication(1024 * 1024);
    limit.set_ordered(i64::MAX);

    let message: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let position = publication.offer(&message).expect("offer");
    assert_eq!(position, (2 * MTU_LENGTH + aligned(10_000 - 2 * MAX_PAYLOAD)) as i64);

    let frames = scan_term(&observer.term_buffer(0));
    assert_eq!(frames.len(), 3);

    let payload_lengths: Vec<usize> = frames.iter().map(|f| f.payload.len()).collect();
    assert_eq!(payload_lengths, vec![4064, 4064, 1872]);
    let flags: Vec<u8> = frames.iter().map(|f| f.flags).collect();
    assert_eq!(flags, vec![frame::BEGIN_FRAG, 0, frame::END_FRAG]);
    assert!(frames.iter().all(|f| f.term_id == INITIAL_TERM_ID));

    let reassembled: Vec<u8> = frames.into_iter().flat_map(|f| f.payload).collect();
    assert_eq!(reassembled, message);
}

#[test]
fn offered_frame_reads_back_with_flags_and_reserved_value() {
    let harness = Harness::new();
    let (publication, limit, observer) = harness.publication(layout::TERM_MIN_LENGTH);
    limit.set_ordered(i64::MAX);

    let message: Vec<u8> = (0..100u8).collect();
    let position = publication
        .offer_with_reserved(&message, |_, _, _| 0xDEAD_BEEF_CAFEi64)
        .expect("offer");

    // The frame begins at the returned position minus its aligned length.
    let frame_offset = position as usize - aligned(100);
    let frames = scan_term(&observer.term_buffer(0));
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].term_offset, frame_offset);
    assert_eq!(frames[0].flags, frame::UNFRAGMENTED);
    assert_eq!(frames[0].reserved_value, 0xDEAD_BEEF_CAFEi64);
    assert_eq!(frames[0].payload, message);
}

#[test]
fn concurrent_producers_partition_the_terms_without_overlap() {
    let harness = Harness::new();
    let term_length = 2 * layout::TERM_MIN_LENGTH;
    let (publication, limit, observer) = harness.publication(term_length);
    limit.set_ordered(i64::MAX);

    const PRODUCERS: usize = 4;
    const OFFERS_PER_PRODUCER: usize = 250;
    const MESSAGE_LENGTH: usize = 100;

    std::thread::scope(|scope| {
        for producer in 0..PRODUCERS {
            let publication = &publication;
            scope.spawn(move || {
                let message = vec![producer as u8 + 1; MESSAGE_LENGTH];
                let mut last_position = 0i64;
                let mut published = 0;
                while published < OFFERS_PER_PRODUCER {
                    match publication.offer(&message).expect("offer") {
                        ADMIN_ACTION => continue,
                        position => {
                            assert!(position > last_position);
                            last_position = position;
                            published += 1;
                        }
                    }
                }
            });
        }
    });

    let meta = observer.meta_data();
    let active_index = meta.active_partition_index_volatile();
    let final_tail = meta.raw_tail_volatile(active_index);
    let final_position = layout::compute_position(
        layout::term_id(final_tail),
        layout::term_offset(final_tail, term_length),
        layout::position_bits_to_shift(term_length),
        INITIAL_TERM_ID,
    );
    assert_eq!(publication.position(), final_position);

    let mut data_frames = 0usize;
    let mut accounted_bytes = 0usize;
    let mut per_producer = [0usize; PRODUCERS];
    let final_term_id = layout::term_id(final_tail);
    for term_id in INITIAL_TERM_ID..=final_term_id {
        let index = layout::index_by_term(INITIAL_TERM_ID, term_id);
        let frames = scan_term(&observer.term_buffer(index));

        let mut expected_offset = 0;
        for scanned in &frames {
            // No overlaps and no gaps: frames partition a prefix of the term.
            assert_eq!(scanned.term_offset, expected_offset);
            assert_eq!(scanned.term_id, term_id);
            expected_offset += frame::align_frame_length(scanned.frame_length);

            if scanned.frame_type == frame::HDR_TYPE_DATA {
                assert_eq!(scanned.payload.len(), MESSAGE_LENGTH);
                let producer = scanned.payload[0] as usize - 1;
                assert!(scanned.payload.iter().all(|b| *b == scanned.payload[0]));
                per_producer[producer] += 1;
                data_frames += 1;
            }
            accounted_bytes += frame::align_frame_length(scanned.frame_length);
        }
    }

    assert_eq!(data_frames, PRODUCERS * OFFERS_PER_PRODUCER);
    assert_eq!(per_producer, [OFFERS_PER_PRODUCER; PRODUCERS]);
    assert_eq!(accounted_bytes as i64, final_position);
}
