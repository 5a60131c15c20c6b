mod common;

use aero_guest_access::{
    AccessError, AccessFlags, DirectMapFailure, ExecContext, ExecFlags, GuestAccess, HandlerMode,
    PhysRange, PhysStatus, StatusCode, UnmapToken,
};
use common::{init_tracing, new_access, FakeGuest};

const RAM: usize = 0x10000;
const GVA: u64 = 0x1FF9;
const GPA_LOW: u64 = 0x5FF9;
const GPA_HIGH: u64 = 0x3000;
/// "Retry in the full-service context" as reported by a write handler.
const TO_FULL_CONTEXT: StatusCode = StatusCode(1160);

fn guest() -> FakeGuest {
    let mut guest = FakeGuest::new(RAM);
    guest.map_page(0x1000, 0x5000);
    guest.map_page(0x2000, 0x3000);
    guest.poke(GPA_LOW, b"lowpage");
    guest.poke(GPA_HIGH, b"hi!");
    guest
}

fn fast_access() -> GuestAccess<u32> {
    let mut acc = new_access();
    acc.set_context(ExecContext::Fast);
    acc
}

fn map_and_fill(
    acc: &mut GuestAccess<u32>,
    bus: &mut FakeGuest,
    fill: &[u8; 10],
) -> UnmapToken {
    let mapped = acc
        .map_cross_page(bus, GVA, 10, AccessFlags::WRITE)
        .unwrap();
    mapped.bytes.copy_from_slice(fill);
    mapped.token
}

fn writes_to(bus: &FakeGuest, gpa: u64) -> usize {
    bus.writes.iter().filter(|op| op.gpa == gpa).count()
}

#[test]
fn second_range_completes_in_the_full_context() {
    init_tracing();
    let mut bus = guest();
    bus.script_write(GPA_HIGH, PhysStatus::Err(TO_FULL_CONTEXT));
    let mut acc = fast_access();

    let token = map_and_fill(&mut acc, &mut bus, b"0123456789");
    assert_eq!(
        acc.commit_and_unmap_deferrable(&mut bus, token),
        Ok(Some(TO_FULL_CONTEXT))
    );
    assert_eq!(bus.peek(GPA_LOW, 7), b"0123456");
    assert_eq!(bus.peek(GPA_HIGH, 3), b"hi!");
    assert_eq!(acc.active_mappings(), 0);

    let pending = acc.pending_completion().unwrap();
    assert!(!pending.first_pending());
    assert!(pending.second_pending());
    assert_eq!(pending.first(), PhysRange::new(GPA_LOW, 7));
    assert_eq!(pending.second(), Some(PhysRange::new(GPA_HIGH, 3)));
    assert_eq!(pending.cause(), TO_FULL_CONTEXT);
    assert_eq!(pending.bytes(), b"0123456789");
    assert_eq!(acc.stats().deferred_commits, 1);

    acc.set_context(ExecContext::Full);
    let status = acc.take_pass_up_status();
    assert_eq!(status, PhysStatus::OkWithNotice(TO_FULL_CONTEXT));
    assert_eq!(acc.drain_deferred(&mut bus, status), Ok(PhysStatus::Ok));

    assert_eq!(bus.peek(GPA_HIGH, 3), b"789");
    assert_eq!(writes_to(&bus, GPA_LOW), 1);
    assert_eq!(writes_to(&bus, GPA_HIGH), 2);
    assert!(!acc.has_pending_completion());
    assert_eq!(acc.stats().drained_commits, 1);
}

#[test]
fn committed_range_notice_survives_deferral_and_drain() {
    let mut bus = guest();
    bus.script_write(GPA_LOW, PhysStatus::OkWithNotice(StatusCode(1110)));
    bus.script_write(GPA_HIGH, PhysStatus::Err(TO_FULL_CONTEXT));
    let mut acc = fast_access();

    let token = map_and_fill(&mut acc, &mut bus, b"0123456789");
    assert_eq!(
        acc.commit_and_unmap_deferrable(&mut bus, token),
        Ok(Some(StatusCode(1110)))
    );
    let pending = acc.pending_completion().unwrap();
    assert_eq!(pending.cause(), TO_FULL_CONTEXT);
    assert_eq!(
        pending.committed(),
        PhysStatus::OkWithNotice(StatusCode(1110))
    );

    acc.set_context(ExecContext::Full);
    let status = acc.take_pass_up_status();
    assert_eq!(status, PhysStatus::OkWithNotice(StatusCode(1110)));
    assert_eq!(
        acc.drain_deferred(&mut bus, status),
        Ok(PhysStatus::OkWithNotice(StatusCode(1110)))
    );
    assert_eq!(bus.peek(GPA_HIGH, 3), b"789");
}

#[test]
fn committed_range_notice_outlives_a_more_urgent_cause() {
    let mut bus = guest();
    bus.script_write(GPA_LOW, PhysStatus::OkWithNotice(StatusCode(1170)));
    bus.script_write(GPA_HIGH, PhysStatus::Err(TO_FULL_CONTEXT));
    let mut acc = fast_access();

    let token = map_and_fill(&mut acc, &mut bus, b"0123456789");
    assert_eq!(
        acc.commit_and_unmap_deferrable(&mut bus, token),
        Ok(Some(TO_FULL_CONTEXT))
    );

    acc.set_context(ExecContext::Full);
    let status = acc.take_pass_up_status();
    assert_eq!(status, PhysStatus::OkWithNotice(TO_FULL_CONTEXT));
    // The cause is resolved by the drain; the committed range's notice is not.
    assert_eq!(
        acc.drain_deferred(&mut bus, status),
        Ok(PhysStatus::OkWithNotice(StatusCode(1170)))
    );
}

#[test]
fn first_range_failure_defers_both_ranges() {
    let mut bus = guest();
    bus.script_write(GPA_LOW, PhysStatus::Err(TO_FULL_CONTEXT));
    let mut acc = fast_access();

    let token = map_and_fill(&mut acc, &mut bus, b"abcdefghij");
    assert_eq!(
        acc.commit_and_unmap_deferrable(&mut bus, token),
        Ok(Some(TO_FULL_CONTEXT))
    );
    assert_eq!(writes_to(&bus, GPA_HIGH), 0);
    let pending = acc.pending_completion().unwrap();
    assert!(pending.first_pending());
    assert!(pending.second_pending());

    acc.set_context(ExecContext::Full);
    let drained = bus.writes.len();
    assert_eq!(
        acc.drain_deferred(&mut bus, PhysStatus::Ok),
        Ok(PhysStatus::Ok)
    );
    let replayed: Vec<_> = bus.writes[drained..]
        .iter()
        .map(|op| (op.gpa, op.len, op.mode))
        .collect();
    assert_eq!(
        replayed,
        vec![
            (GPA_LOW, 7, HandlerMode::Aware),
            (GPA_HIGH, 3, HandlerMode::Aware)
        ]
    );
    assert_eq!(bus.peek(GPA_LOW, 7), b"abcdefg");
    assert_eq!(bus.peek(GPA_HIGH, 3), b"hij");
}

#[test]
fn single_range_failure_defers_only_the_first_range() {
    let mut bus = guest();
    bus.script_write(0x4000, PhysStatus::Err(TO_FULL_CONTEXT));
    let mut acc = fast_access();

    let mapped = acc
        .map_phys_fallback(
            &mut bus,
            0x4000,
            4,
            AccessFlags::WRITE,
            DirectMapFailure::CatchWrite,
        )
        .unwrap();
    mapped.bytes.copy_from_slice(b"mmio");
    let token = mapped.token;
    acc.commit_and_unmap_deferrable(&mut bus, token).unwrap();

    let pending = acc.pending_completion().unwrap();
    assert!(pending.first_pending());
    assert!(!pending.second_pending());
    assert_eq!(pending.second(), None);

    acc.set_context(ExecContext::Full);
    acc.drain_deferred(&mut bus, PhysStatus::Ok).unwrap();
    assert_eq!(bus.peek(0x4000, 4), b"mmio");
}

#[test]
fn deferral_releases_every_other_mapping() {
    let mut bus = guest();
    bus.script_write(GPA_HIGH, PhysStatus::Err(TO_FULL_CONTEXT));
    let mut acc = fast_access();

    let other = acc.map_direct(AccessFlags::READ, Some(9)).unwrap();
    let token = map_and_fill(&mut acc, &mut bus, b"0123456789");
    acc.commit_and_unmap_deferrable(&mut bus, token).unwrap();

    assert_eq!(acc.active_mappings(), 0);
    assert_eq!(bus.released_locks, vec![9]);
    assert!(acc.commit_and_unmap(&mut bus, other).is_err());
}

#[test]
fn a_second_deferral_is_refused() {
    let mut bus = guest();
    bus.script_write(GPA_HIGH, PhysStatus::Err(TO_FULL_CONTEXT));
    bus.script_write(GPA_HIGH, PhysStatus::Err(TO_FULL_CONTEXT));
    let mut acc = fast_access();

    let token = map_and_fill(&mut acc, &mut bus, b"0123456789");
    acc.commit_and_unmap_deferrable(&mut bus, token).unwrap();
    let first = acc.pending_completion().cloned().unwrap();

    let token = map_and_fill(&mut acc, &mut bus, b"9876543210");
    assert!(matches!(
        acc.commit_and_unmap_deferrable(&mut bus, token),
        Err(AccessError::ProtocolMisuse { token: None, .. })
    ));
    assert_eq!(acc.pending_completion(), Some(&first));
    assert_eq!(acc.active_mappings(), 0);
}

#[test]
fn drain_merges_with_the_incoming_status() {
    let mut bus = guest();
    bus.script_write(GPA_HIGH, PhysStatus::Err(TO_FULL_CONTEXT));
    bus.script_write(GPA_HIGH, PhysStatus::OkWithNotice(StatusCode(1110)));
    let mut acc = fast_access();

    let token = map_and_fill(&mut acc, &mut bus, b"0123456789");
    acc.commit_and_unmap_deferrable(&mut bus, token).unwrap();

    acc.set_context(ExecContext::Full);
    assert_eq!(
        acc.drain_deferred(&mut bus, PhysStatus::OkWithNotice(StatusCode(1130))),
        Ok(PhysStatus::OkWithNotice(StatusCode(1110)))
    );
}

#[test]
fn drain_failure_wins() {
    let mut bus = guest();
    bus.script_write(GPA_HIGH, PhysStatus::Err(TO_FULL_CONTEXT));
    bus.script_write(GPA_HIGH, PhysStatus::Err(StatusCode(-1600)));
    let mut acc = fast_access();

    let token = map_and_fill(&mut acc, &mut bus, b"0123456789");
    acc.commit_and_unmap_deferrable(&mut bus, token).unwrap();

    acc.set_context(ExecContext::Full);
    assert_eq!(
        acc.drain_deferred(&mut bus, PhysStatus::OkWithNotice(StatusCode(1130))),
        Ok(PhysStatus::Err(StatusCode(-1600)))
    );
    assert!(!acc.has_pending_completion());
    assert_eq!(bus.peek(GPA_HIGH, 3), b"hi!");
}

#[test]
fn drain_without_pending_write_passes_status_through() {
    let mut bus = guest();
    let mut acc = new_access();
    for status in [
        PhysStatus::Ok,
        PhysStatus::OkWithNotice(StatusCode(1130)),
        PhysStatus::Err(StatusCode(-1)),
    ] {
        assert_eq!(acc.drain_deferred(&mut bus, status), Ok(status));
    }
    assert!(bus.writes.is_empty());
    assert_eq!(acc.stats().drained_commits, 0);
}

#[test]
fn drain_in_fast_context_is_misuse() {
    let mut bus = guest();
    bus.script_write(GPA_HIGH, PhysStatus::Err(TO_FULL_CONTEXT));
    let mut acc = fast_access();

    let token = map_and_fill(&mut acc, &mut bus, b"0123456789");
    acc.commit_and_unmap_deferrable(&mut bus, token).unwrap();
    assert!(matches!(
        acc.drain_deferred(&mut bus, PhysStatus::Ok),
        Err(AccessError::ProtocolMisuse { .. })
    ));
    assert!(acc.has_pending_completion());
}

#[test]
fn bypass_mode_never_defers() {
    let mut bus = guest();
    bus.script_write(GPA_HIGH, PhysStatus::Err(TO_FULL_CONTEXT));
    let mut acc = fast_access();
    acc.set_exec_flags(ExecFlags::BYPASS_HANDLERS);

    let token = map_and_fill(&mut acc, &mut bus, b"0123456789");
    assert_eq!(
        acc.commit_and_unmap_deferrable(&mut bus, token),
        Err(AccessError::Handler(TO_FULL_CONTEXT))
    );
    assert!(!acc.has_pending_completion());
    assert_eq!(acc.active_mappings(), 0);
}

#[test]
fn successful_deferrable_commit_behaves_like_a_plain_commit() {
    let mut bus = guest();
    let mut acc = fast_access();

    let token = map_and_fill(&mut acc, &mut bus, b"0123456789");
    assert_eq!(acc.commit_and_unmap_deferrable(&mut bus, token), Ok(None));
    assert!(!acc.has_pending_completion());
    assert_eq!(bus.peek(GPA_HIGH, 3), b"789");
}
