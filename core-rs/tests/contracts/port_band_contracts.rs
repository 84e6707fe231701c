//! Port Band Contract Tests
//!
//! These tests pin INVARIANTS of the port bands that every environment
//! orchestrator relies on. Each test documents WHY the invariant exists.

use envport_core::{EnvironmentType, PortBand, PortBands};

/// WHY: Orchestrators hard-code these bands in .env and compose templates
/// REASON: Existing environments keep their ports across upgrades
/// BREAKS: Every generated config that embeds a port
/// SACRIFICES: If this fails, you're moving live environments
#[test]
fn default_bands_are_protocol_constants() {
    let bands = PortBands::default();

    assert_eq!(bands.get(EnvironmentType::Test), PortBand::new(3100, 3100, 3199));
    assert_eq!(bands.get(EnvironmentType::Theme), PortBand::new(3200, 3200, 3299));
    assert_eq!(bands.get(EnvironmentType::Demo), PortBand::new(3300, 3300, 3399));
    assert_eq!(bands.get(EnvironmentType::Release), PortBand::new(3456, 3456, 3456));
    assert_eq!(bands.get(EnvironmentType::Epic), PortBand::new(3500, 3500, 3599));
}

/// WHY: A port maps back to exactly one environment type
/// REASON: allocate_service_port derives the type from the portal port
/// BREAKS: Service ports could be drawn from the wrong band
/// SACRIFICES: If this fails, type lookup by port is ambiguous
#[test]
fn bands_never_overlap() {
    let bands = PortBands::default();
    let all: Vec<(EnvironmentType, PortBand)> = bands.iter().collect();

    for (i, (type_a, a)) in all.iter().enumerate() {
        for (type_b, b) in &all[i + 1..] {
            assert!(
                a.range_end < b.range_start || b.range_end < a.range_start,
                "{} ({}) overlaps with {} ({})",
                type_a,
                a.range(),
                type_b,
                b.range()
            );
        }
    }
}

/// WHY: release is a singleton slot, not a pool
/// REASON: Only one release environment may exist at a time
/// BREAKS: Two release stacks would bind the same public port
/// SACRIFICES: If this fails, release stops being exclusive
#[test]
fn release_band_is_a_single_port() {
    let release = PortBands::default().get(EnvironmentType::Release);

    assert_eq!(release.range_start, release.range_end);
    assert_eq!(release.base_port, release.range_start);
    assert_eq!(release.total(), 1);
}

/// WHY: Portal allocation starts scanning at the base port
/// REASON: The first environment of a type lands on the advertised port
/// BREAKS: Documentation and bookmarks pointing at base ports
#[test]
fn base_port_is_inside_its_band() {
    for (env_type, band) in PortBands::default().iter() {
        assert!(
            band.contains(band.base_port),
            "{} base port {} outside {}",
            env_type,
            band.base_port,
            band.range()
        );
    }
}

/// WHY: Every pooled band has exactly 100 ports
/// REASON: Capacity planning for concurrent environments per type
/// SACRIFICES: If this fails, document WHY capacity changed
#[test]
fn pooled_bands_have_100_ports() {
    for (env_type, band) in PortBands::default().iter() {
        if env_type == EnvironmentType::Release {
            continue;
        }
        assert_eq!(band.total(), 100, "{} band should hold 100 ports", env_type);
    }
}

/// WHY: Each band port resolves to its own type
/// REASON: Usage summaries count ports by band membership
#[test]
fn every_band_port_resolves_to_its_type() {
    let bands = PortBands::default();

    for (env_type, band) in bands.iter() {
        for port in band.range().ports() {
            assert_eq!(bands.type_for_port(port), Some(env_type));
        }
    }

    // Gaps between bands belong to nobody
    assert_eq!(bands.type_for_port(3400), None);
    assert_eq!(bands.type_for_port(3455), None);
    assert_eq!(bands.type_for_port(3457), None);
}
