mod common;

use std::sync::Arc;

use common::{Fixture, IMAGES_POOL, POOL};
use storage_rbd::{
    ClusterError, Connector, DriverError, ImageLocation, TracingSink, VolumeHandle, VolumeOptions,
};
use storage_rbd_testing::Fault;

#[test]
fn every_operation_releases_its_connection() {
    let fixture = Fixture::new();
    fixture.cluster.add_image(POOL, "disk", 1024);
    fixture
        .cluster
        .add_image(IMAGES_POOL, "base", 2048)
        .add_snapshot(IMAGES_POOL, "base", "snap");

    let driver = &fixture.driver;
    assert_eq!(driver.size("disk").unwrap(), 1024);
    driver.resize("disk", 4096).unwrap();
    assert!(driver.exists("disk", None, None).unwrap());
    assert!(!driver.exists("ghost", None, None).unwrap());
    driver
        .clone(
            &ImageLocation::new(format!("rbd://{}/images/base/snap", common::FSID)),
            "clone",
        )
        .unwrap();
    driver.remove_image("disk").unwrap();
    driver.pool_info().unwrap();
    driver.fsid().unwrap();

    let accounting = fixture.cluster.accounting();
    assert!(accounting.is_balanced(), "{accounting:?}");
    // size, resize, exists x2, clone x2, remove, pool_info, fsid
    assert_eq!(accounting.sessions_created, 9);
    assert_eq!(accounting.images_opened, 3);
}

#[test]
fn image_open_failure_releases_connection_exactly_once() {
    let fixture = Fixture::new();
    fixture.cluster.add_image(POOL, "disk", 1024);
    fixture
        .cluster
        .inject(Fault::OpenImage(ClusterError::Io("eio".into())));

    let result = fixture.driver.size("disk");
    assert!(matches!(result, Err(DriverError::Volume(ClusterError::Io(_)))));

    let accounting = fixture.cluster.accounting();
    assert_eq!(accounting.sessions_created, 1);
    assert_eq!(accounting.sessions_shutdown, 1);
    assert_eq!(accounting.contexts_opened, 1);
    assert_eq!(accounting.contexts_closed, 1);
    assert_eq!(accounting.images_opened, 0);
    assert_eq!(fixture.events.named("image_open_failed").len(), 1);
}

#[test]
fn missing_image_releases_connection() {
    let fixture = Fixture::new();

    assert!(matches!(
        fixture.driver.size("ghost"),
        Err(DriverError::VolumeNotFound(_))
    ));
    fixture.assert_balanced();
    assert_eq!(fixture.events.named("image_missing").len(), 1);
}

#[test]
fn context_open_failure_shuts_session_down() {
    let fixture = Fixture::new();
    fixture
        .cluster
        .inject(Fault::OpenIoContext(ClusterError::PermissionDenied(
            "client.nova".into(),
        )));

    assert!(matches!(
        fixture.driver.pool_info(),
        Err(DriverError::Connection(ClusterError::PermissionDenied(_)))
    ));

    let accounting = fixture.cluster.accounting();
    assert_eq!(accounting.sessions_created, 1);
    assert_eq!(accounting.sessions_shutdown, 1);
    assert_eq!(accounting.contexts_opened, 0);
    assert_eq!(accounting.contexts_closed, 0);
}

#[test]
fn connect_failure_shuts_session_down() {
    let fixture = Fixture::new();
    fixture
        .cluster
        .inject(Fault::Connect(ClusterError::Unreachable("mon.a".into())));

    assert!(matches!(
        fixture.driver.exists("disk", None, None),
        Err(DriverError::Connection(ClusterError::Unreachable(_)))
    ));
    fixture.assert_balanced();
    assert_eq!(fixture.cluster.accounting().sessions_shutdown, 1);
}

#[test]
fn session_creation_failure_is_a_connection_error() {
    let fixture = Fixture::new();
    fixture
        .cluster
        .inject(Fault::CreateSession(ClusterError::InvalidArgument(
            "bad conf".into(),
        )));

    assert!(matches!(
        fixture.driver.fsid(),
        Err(DriverError::Connection(ClusterError::InvalidArgument(_)))
    ));
    assert_eq!(fixture.cluster.accounting().sessions_created, 0);
    assert_eq!(fixture.cluster.accounting().sessions_shutdown, 0);
}

#[test]
fn unknown_pool_is_a_connection_error() {
    let fixture = Fixture::new();

    assert!(matches!(
        fixture.driver.exists("disk", Some("nope"), None),
        Err(DriverError::Connection(ClusterError::PoolNotFound(pool))) if pool == "nope"
    ));
    fixture.assert_balanced();
}

#[test]
fn image_close_failure_still_releases_connection() {
    let fixture = Fixture::new();
    fixture.cluster.add_image(POOL, "disk", 1024);
    fixture
        .cluster
        .inject(Fault::CloseImage(ClusterError::Io("flush".into())));

    assert!(matches!(
        fixture.driver.size("disk"),
        Err(DriverError::Volume(ClusterError::Io(_)))
    ));
    fixture.assert_balanced();
}

#[test]
fn volume_handle_forwards_io_and_releases_on_close() {
    let fixture = Fixture::new();
    fixture.cluster.add_image(POOL, "disk", 16);
    let connector = Connector::new(
        Arc::new(fixture.cluster.clone()),
        Arc::new(common::config()),
        Arc::new(TracingSink),
    );

    let mut handle = VolumeHandle::open(&connector, "disk", VolumeOptions::read_write()).unwrap();
    assert_eq!(handle.name(), "disk");
    assert_eq!(handle.connection().pool(), POOL);
    assert_eq!(handle.write(4, b"rbd").unwrap(), 3);
    assert_eq!(handle.read(3, 5).unwrap(), b"\0rbd\0".to_vec());
    handle.resize(8).unwrap();
    assert_eq!(handle.size().unwrap(), 8);
    handle.close().unwrap();

    fixture.assert_balanced();
    assert_eq!(fixture.cluster.accounting().images_closed, 1);
}

#[test]
fn dropped_handle_releases_everything() {
    let fixture = Fixture::new();
    fixture.cluster.add_image(POOL, "disk", 16);
    let connector = Connector::new(
        Arc::new(fixture.cluster.clone()),
        Arc::new(common::config()),
        Arc::new(TracingSink),
    );

    {
        let handle = VolumeHandle::open(&connector, "disk", VolumeOptions::read_only()).unwrap();
        assert!(handle.size().is_ok());
    }

    fixture.assert_balanced();
    assert_eq!(fixture.cluster.accounting().sessions_shutdown, 1);
}

#[test]
fn read_only_handle_rejects_writes() {
    let fixture = Fixture::new();
    fixture.cluster.add_image(POOL, "disk", 16);
    let connector = Connector::new(
        Arc::new(fixture.cluster.clone()),
        Arc::new(common::config()),
        Arc::new(TracingSink),
    );

    let mut handle = VolumeHandle::open(&connector, "disk", VolumeOptions::read_only()).unwrap();
    assert!(matches!(
        handle.write(0, b"x"),
        Err(DriverError::Volume(ClusterError::InvalidArgument(_)))
    ));
    drop(handle);
    fixture.assert_balanced();
}

#[test]
fn sessions_use_configured_identity() {
    let config = common::config()
        .with_rbd_user("nova")
        .with_ceph_conf("/etc/ceph/ceph.conf");
    let fixture = Fixture::with_config(config);

    fixture.driver.fsid().unwrap();
    assert_eq!(fixture.cluster.last_identity().as_deref(), Some("nova"));
    assert_eq!(
        fixture.cluster.last_conf().as_deref(),
        Some(std::path::Path::new("/etc/ceph/ceph.conf"))
    );
}
