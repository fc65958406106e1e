mod common;

use std::time::{Duration, Instant};

use common::{Fixture, POOL};
use storage_rbd::{CleanupPolicy, ClusterError, DriverError, RemovedVolume};

const OWNER: &str = "7f3c0b8e-instance";

fn owned(suffix: &str) -> String {
    format!("{OWNER}_{suffix}")
}

#[test]
fn always_busy_volume_exhausts_budget_then_surfaces_final_error() {
    let fixture = Fixture::new();
    let disk = owned("disk");
    fixture.cluster.add_image(POOL, &disk, 1);
    fixture.cluster.set_busy(POOL, &disk, true);

    let result = fixture.driver.cleanup_volumes(OWNER);

    assert!(matches!(result, Err(DriverError::VolumeBusy(name)) if name == disk));
    assert_eq!(fixture.cluster.removal_calls(&disk), 11);
    assert_eq!(fixture.events.named("cleanup_retry").len(), 10);
    assert_eq!(fixture.events.named("cleanup_failed").len(), 1);
    fixture.assert_balanced();
}

#[test]
fn volume_removed_on_third_attempt_stops_retrying() {
    let fixture = Fixture::new();
    let disk = owned("disk");
    fixture.cluster.add_image(POOL, &disk, 1);
    fixture.cluster.fail_removals(
        &disk,
        [
            ClusterError::ImageBusy(disk.clone()),
            ClusterError::ImageHasSnapshots(disk.clone()),
        ],
    );

    let report = fixture.driver.cleanup_volumes(OWNER).unwrap();

    assert_eq!(
        report.removed,
        vec![RemovedVolume {
            name: disk.clone(),
            attempts: 3,
        }]
    );
    assert_eq!(fixture.cluster.removal_calls(&disk), 3);
    assert_eq!(fixture.events.named("cleanup_retry").len(), 2);
    assert!(fixture.cluster.image_names(POOL).is_empty());
}

#[test]
fn final_synchronous_attempt_can_succeed() {
    let fixture = Fixture::new();
    let disk = owned("disk");
    fixture.cluster.add_image(POOL, &disk, 1);
    fixture
        .cluster
        .fail_removals(&disk, (0..10).map(|_| ClusterError::ImageBusy(disk.clone())));

    let report = fixture.driver.cleanup_volumes(OWNER).unwrap();

    assert_eq!(report.removed[0].attempts, 11);
    assert_eq!(fixture.cluster.removal_calls(&disk), 11);
    assert!(fixture.events.named("cleanup_failed").is_empty());
}

#[test]
fn only_owner_volumes_are_touched() {
    let fixture = Fixture::new();
    fixture.cluster.add_image(POOL, &owned("disk"), 1);
    fixture.cluster.add_image(POOL, &owned("disk.local"), 1);
    fixture.cluster.add_image(POOL, "other-instance_disk", 1);

    let report = fixture.driver.cleanup_volumes(OWNER).unwrap();

    assert_eq!(report.removed.len(), 2);
    assert_eq!(fixture.cluster.image_names(POOL), vec!["other-instance_disk"]);
    assert_eq!(fixture.cluster.removal_calls("other-instance_disk"), 0);
    fixture.assert_balanced();
}

#[test]
fn stuck_volume_does_not_block_the_rest() {
    let fixture = Fixture::new();
    let stuck = owned("a");
    fixture.cluster.add_image(POOL, &stuck, 1);
    fixture
        .cluster
        .add_image(POOL, &owned("b"), 1)
        .add_snapshot(POOL, &stuck, "keep");

    let result = fixture.driver.cleanup_volumes(OWNER);

    assert!(matches!(result, Err(DriverError::VolumeHasSnapshots(name)) if name == stuck));
    assert_eq!(fixture.cluster.image_names(POOL), vec![stuck.clone()]);
    assert_eq!(fixture.cluster.removal_calls(&owned("b")), 1);
}

#[test]
fn non_retryable_failure_ends_that_volume_immediately() {
    let fixture = Fixture::new();
    let disk = owned("disk");
    fixture.cluster.add_image(POOL, &disk, 1);
    fixture
        .cluster
        .fail_removals(&disk, [ClusterError::Io("osd down".into())]);

    let result = fixture.driver.cleanup_volumes(OWNER);

    assert!(matches!(
        result,
        Err(DriverError::Volume(ClusterError::Io(_)))
    ));
    assert_eq!(fixture.cluster.removal_calls(&disk), 1);
    assert!(fixture.events.named("cleanup_retry").is_empty());
}

#[test]
fn attempt_budget_comes_from_config() {
    let config = common::config()
        .with_cleanup(CleanupPolicy {
            attempts: 3,
            interval: Duration::ZERO,
        })
        .unwrap();
    let fixture = Fixture::with_config(config);
    let disk = owned("disk");
    fixture.cluster.add_image(POOL, &disk, 1);
    fixture.cluster.set_busy(POOL, &disk, true);

    assert!(fixture.driver.cleanup_volumes(OWNER).is_err());
    assert_eq!(fixture.cluster.removal_calls(&disk), 4);
}

#[test]
fn scheduled_attempts_are_spaced_by_the_interval() {
    let interval = Duration::from_millis(20);
    let config = common::config()
        .with_cleanup(CleanupPolicy {
            attempts: 3,
            interval,
        })
        .unwrap();
    let fixture = Fixture::with_config(config);
    let disk = owned("disk");
    fixture.cluster.add_image(POOL, &disk, 1);
    fixture.cluster.set_busy(POOL, &disk, true);

    let started = Instant::now();
    assert!(fixture.driver.cleanup_volumes(OWNER).is_err());

    // waits follow the first two attempts only
    assert!(started.elapsed() >= interval * 2);
    assert_eq!(fixture.cluster.removal_calls(&disk), 4);
}

#[test]
fn no_wait_before_or_after_the_final_attempt() {
    let interval = Duration::from_secs(30);
    let config = common::config()
        .with_cleanup(CleanupPolicy {
            attempts: 1,
            interval,
        })
        .unwrap();
    let fixture = Fixture::with_config(config);
    let disk = owned("disk");
    fixture.cluster.add_image(POOL, &disk, 1);
    fixture.cluster.set_busy(POOL, &disk, true);

    let started = Instant::now();
    assert!(matches!(
        fixture.driver.cleanup_volumes(OWNER),
        Err(DriverError::VolumeBusy(_))
    ));

    assert!(started.elapsed() < interval);
    assert_eq!(fixture.cluster.removal_calls(&disk), 2);
}

#[test]
fn empty_pool_is_a_successful_pass() {
    let fixture = Fixture::new();

    let report = fixture.driver.cleanup_volumes(OWNER).unwrap();

    assert!(report.removed.is_empty());
    fixture.assert_balanced();
}
