//! Drives a two-node unicast scenario through the public API: two nodes in
//! range of each other, one sends a DIS, the other receives it, then the
//! world is torn down.

use std::time::Duration;

use anyhow::{Context, Result};
use env_logger::Builder;
use log::{info, LevelFilter};

use rpl_sim::config::{PhyTransmitMode, WorldConfig};
use rpl_sim::node::{IpAddr, MacAddr};
use rpl_sim::pdu::{self, IcmpPdu, IpSdu, NoopHooks, RplMessage};
use rpl_sim::world::World;

fn main() -> Result<()> {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("rpl_sim"), LevelFilter::Debug)
        .init();

    let config = WorldConfig {
        width: 200.0,
        height: 200.0,
        no_link_dist_thresh: 50.0,
        no_link_quality_thresh: 0.2,
        transmission_time: 10,
        phy_transmit_mode: PhyTransmitMode::Unicast,
        ..WorldConfig::default()
    };

    let world = World::create(config, Box::new(NoopHooks)).context("building world from config")?;

    let alice = world
        .add_node(
            "alice",
            MacAddr("aaaaaaaaaaaa".into()),
            IpAddr("fe80::1".into()),
            (0.0, 0.0),
            1.0,
        )
        .context("adding alice")?;
    let bob = world
        .add_node(
            "bob",
            MacAddr("bbbbbbbbbbbb".into()),
            IpAddr("fe80::2".into()),
            (20.0, 0.0),
            1.0,
        )
        .context("adding bob")?;

    world.start(false);
    let bob_node = world.find_node(bob).context("bob was just added")?;
    world.wait_until(|| bob_node.execute_sync(|h| h.is_alive()), Duration::from_secs(1));

    info!("sending DIS from alice to bob at {}", world.sim_time_to_string(true));
    world.send(alice, IpAddr("fe80::2".into()), pdu::NEXT_HEADER_ICMP, IpSdu::Icmp(IcmpPdu::for_rpl(RplMessage::Dis)));

    world.wait_until(
        || world.now() >= world.config().transmission_time,
        Duration::from_secs(1),
    );
    info!("scenario settled at {}", world.sim_time_to_string(true));

    world.stop();
    Ok(())
}
