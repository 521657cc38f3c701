//! Integration tests for the election pipeline: ranking, activation
//! gating, pre-activation padding, and epoch rolls.

mod common;

use common::{name, MemState};
use meridian_consensus::{genesis, DposConfig, System};

fn test_config() -> DposConfig {
    DposConfig {
        unit_stake: 10,
        candidate_min_quantity: 1,
        voter_min_quantity: 1,
        candidate_schedule_size: 3,
        backup_schedule_size: 2,
        activated_min_quantity: 10,
        block_interval: 1_000,
        epoch_interval: 48_000,
        mepochs_per_epoch: 4,
        min_mepoch: 1,
        block_frequency: 1,
        reference_time: 0,
        ..DposConfig::default()
    }
}

fn setup(config: &DposConfig) -> MemState {
    let mut state = MemState::new();
    genesis(config, &mut state, 0, 0).unwrap();
    for account in ["alice", "bob", "carol", "dave", "erin"] {
        state.set_balance(account, 10_000);
    }
    state
}

#[test]
fn test_genesis_schedule_cycles_system_producer() {
    let config = test_config();
    let mut state = setup(&config);
    let mut sys = System::new(&config, &mut state);

    // Before activation the lone system candidate fills every primary slot.
    let gstate = sys.db().get_state(0).unwrap();
    assert!(!gstate.dpos_active);
    assert_eq!(
        gstate.activated_candidate_schedule,
        vec![
            config.system_name.clone(),
            config.system_name.clone(),
            config.system_name.clone()
        ]
    );
}

#[test]
fn test_election_sorts_by_stake() {
    // Totals 5, 3, 7 elect ["carol", "alice", "bob"].
    let config = test_config();
    let mut state = setup(&config);
    let mut sys = System::new(&config, &mut state);

    sys.reg_candidate(0, "alice", "", 50, 1).unwrap();
    sys.reg_candidate(0, "bob", "", 30, 1).unwrap();
    sys.reg_candidate(0, "carol", "", 70, 1).unwrap();

    sys.on_block(1, 10).unwrap();
    sys.update_elected_candidates(1, 10).unwrap();

    let gstate = sys.db().get_state(1).unwrap();
    assert_eq!(
        &gstate.activated_candidate_schedule[..3],
        &[name("carol"), name("alice"), name("bob")]
    );
}

#[test]
fn test_activation_requires_stake_and_headcount() {
    let config = test_config();
    let mut state = setup(&config);
    let mut sys = System::new(&config, &mut state);

    // Three registrations plus the system candidate: enough stake, one
    // head short of n = 5.
    sys.reg_candidate(0, "alice", "", 50, 1).unwrap();
    sys.reg_candidate(0, "bob", "", 30, 1).unwrap();
    sys.reg_candidate(0, "carol", "", 70, 1).unwrap();

    sys.on_block(1, 10).unwrap();
    sys.update_elected_candidates(1, 10).unwrap();
    assert!(!sys.db().get_state(1).unwrap().dpos_active);

    // Two more candidates tip the headcount.
    sys.reg_candidate(1, "dave", "", 20, 11).unwrap();
    sys.reg_candidate(1, "erin", "", 10, 11).unwrap();
    sys.on_block(2, 20).unwrap();
    sys.update_elected_candidates(2, 20).unwrap();

    let gstate = sys.db().get_state(2).unwrap();
    assert!(gstate.dpos_active);
    // Once active, the system producer is no longer electable and the
    // schedule carries primaries plus backups.
    assert_eq!(gstate.activated_candidate_schedule.len() as u64, 5);
    assert!(!gstate
        .activated_candidate_schedule
        .contains(&config.system_name));
    assert_eq!(
        gstate.activated_candidate_schedule,
        vec![
            name("carol"),
            name("alice"),
            name("bob"),
            name("dave"),
            name("erin")
        ]
    );
    // Activated total covers the primaries only: 7 + 5 + 3.
    assert_eq!(gstate.activated_total_quantity, 15);
}

#[test]
fn test_pre_activation_padding_cycles_candidates() {
    let config = test_config();
    let mut state = setup(&config);
    let mut sys = System::new(&config, &mut state);

    sys.reg_candidate(0, "alice", "", 50, 1).unwrap();

    sys.on_block(1, 10).unwrap();
    sys.update_elected_candidates(1, 10).unwrap();

    let gstate = sys.db().get_state(1).unwrap();
    assert!(!gstate.dpos_active);
    // Two candidates (system included) cycle from the start to fill the
    // three primary slots.
    assert_eq!(
        gstate.activated_candidate_schedule,
        vec![name("alice"), config.system_name.clone(), name("alice")]
    );
}

#[test]
fn test_election_excludes_frozen_and_blacklisted() {
    let config = test_config();
    let mut state = setup(&config);
    let mut sys = System::new(&config, &mut state);

    sys.reg_candidate(0, "alice", "", 50, 1).unwrap();
    sys.reg_candidate(0, "bob", "", 30, 1).unwrap();
    sys.reg_candidate(0, "carol", "", 70, 1).unwrap();
    sys.reg_candidate(0, "dave", "", 20, 1).unwrap();
    sys.reg_candidate(0, "erin", "", 10, 1).unwrap();

    sys.unreg_candidate(0, &name("carol"), 2).unwrap();
    sys.kicked_candidate(0, &name("dave"), 3).unwrap();

    sys.on_block(1, 10).unwrap();
    sys.update_elected_candidates(1, 10).unwrap();

    let gstate = sys.db().get_state(1).unwrap();
    assert!(!gstate
        .activated_candidate_schedule
        .contains(&name("carol")));
    assert!(!gstate.activated_candidate_schedule.contains(&name("dave")));
}

#[test]
fn test_election_resets_counters_and_off_schedule() {
    let config = test_config();
    let mut state = setup(&config);
    let mut sys = System::new(&config, &mut state);

    sys.reg_candidate(0, "alice", "", 50, 1).unwrap();
    let mut info = sys.db().get_candidate(&name("alice")).unwrap().unwrap();
    info.counter = 9;
    info.actual_counter = 4;
    sys.db().set_candidate(&info).unwrap();

    let mut gstate = sys.db().get_state(0).unwrap();
    gstate.off_candidate_schedule = vec![2];
    sys.db().set_state(&gstate).unwrap();

    sys.on_block(1, 10).unwrap();
    sys.update_elected_candidates(1, 10).unwrap();

    let info = sys.db().get_candidate(&name("alice")).unwrap().unwrap();
    assert_eq!(info.epoch, 1);
    assert_eq!(info.counter, 0);
    assert_eq!(info.actual_counter, 0);
    assert!(sys
        .db()
        .get_state(1)
        .unwrap()
        .off_candidate_schedule
        .is_empty());
}

#[test]
fn test_on_block_carries_totals_and_flags_forward() {
    let config = test_config();
    let mut state = setup(&config);
    let mut sys = System::new(&config, &mut state);

    sys.reg_candidate(0, "alice", "", 50, 1).unwrap();
    let mut gstate = sys.db().get_state(0).unwrap();
    gstate.take_over = true;
    sys.db().set_state(&gstate).unwrap();

    sys.on_block(3, 30).unwrap();

    let next = sys.db().get_state(3).unwrap();
    assert_eq!(next.pre_epoch, 0);
    assert_eq!(next.total_quantity, 5);
    assert!(next.take_over);
    assert_eq!(next.number, 30);
    assert_eq!(sys.db().get_latest_epoch().unwrap(), 3);

    // Reopening an already-open epoch is a no-op.
    sys.on_block(3, 31).unwrap();
    assert_eq!(sys.db().get_state(3).unwrap().number, 30);
}
