//! Host utilisation snapshot.

use project_factory::engines::system::{system_health, ResourceUsage};

#[test]
fn usage_rounds_to_one_decimal() {
    let gib = 1024 * 1024 * 1024;
    let usage = ResourceUsage::from_bytes(16 * gib, 4 * gib);
    assert!((usage.total_gb - 16.0).abs() < f64::EPSILON);
    assert!((usage.used_percent - 25.0).abs() < f64::EPSILON);

    let odd = ResourceUsage::from_bytes(3 * gib, gib);
    assert!((odd.used_percent - 33.3).abs() < 1e-9);
}

#[test]
fn zero_total_reports_nothing_used() {
    let usage = ResourceUsage::from_bytes(0, 10);
    assert!(usage.total_gb.abs() < f64::EPSILON);
    assert!(usage.used_percent.abs() < f64::EPSILON);
}

#[test]
fn used_never_exceeds_total() {
    let usage = ResourceUsage::from_bytes(100, 250);
    assert!((usage.used_percent - 100.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn snapshot_reports_plausible_values() {
    let dir = tempfile::tempdir().expect("tempdir");
    let health = system_health(dir.path()).await.expect("health");

    assert!(health.cpu_percent >= 0.0);
    assert!(health.memory.total_gb > 0.0);
    assert!((0.0..=100.0).contains(&health.memory.used_percent));
    if let Some(disk) = health.disk {
        assert!((0.0..=100.0).contains(&disk.used_percent));
        let mount = health.disk_mount.expect("mount point");
        assert!(dir.path().starts_with(mount));
    }
}
