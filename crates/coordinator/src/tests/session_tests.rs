use super::*;
use crate::registry::MissionSpec;

fn t0() -> DateTime<Utc> {
    "2024-01-01T00:00:00Z".parse().expect("timestamp")
}

fn two_missions() -> Session {
    let registry = MissionRegistry::new(vec![
        MissionSpec::new(MissionId(1), 5),
        MissionSpec::new(MissionId(2), 30),
    ])
    .expect("registry");
    Session::new(&registry)
}

fn status(session: &Session, id: u32) -> MissionStatus {
    session.mission(MissionId(id)).expect("mission").status()
}

#[test]
fn start_sets_absolute_deadline() {
    let mut session = two_missions();
    assert_eq!(session.start(MissionId(1), t0()), Ok(Effect::Mutated));

    let mission = session.mission(MissionId(1)).expect("mission");
    assert_eq!(mission.status(), MissionStatus::Active);
    assert_eq!(mission.deadline(), Some(t0() + Duration::seconds(5)));
    assert_eq!(session.revision(), 1);
    assert!(session.invariant_violation().is_none());
}

#[test]
fn start_is_blocked_by_another_active_mission() {
    let mut session = two_missions();
    session.start(MissionId(1), t0()).expect("start 1");
    let before = session.snapshot(t0());

    let err = session
        .start(MissionId(2), t0())
        .expect_err("second start must be rejected");
    assert_eq!(
        err,
        CommandError::Blocked {
            mission_id: MissionId(2),
            blocking: MissionId(1),
        }
    );
    assert_eq!(err.code(), ErrorCode::InvalidTransition);
    assert_eq!(session.snapshot(t0()), before);
}

#[test]
fn start_rejects_active_completed_and_failed_missions() {
    let mut session = two_missions();
    session.start(MissionId(1), t0()).expect("start");
    assert!(matches!(
        session.start(MissionId(1), t0()),
        Err(CommandError::InvalidTransition {
            status: MissionStatus::Active,
            ..
        })
    ));

    session.complete(MissionId(1)).expect("complete");
    assert!(matches!(
        session.start(MissionId(1), t0()),
        Err(CommandError::InvalidTransition {
            status: MissionStatus::Completed,
            ..
        })
    ));

    session.start(MissionId(2), t0()).expect("start 2");
    session
        .expire_if_due(MissionId(2), t0() + Duration::seconds(30))
        .expect("expire");
    assert!(matches!(
        session.start(MissionId(2), t0()),
        Err(CommandError::InvalidTransition {
            status: MissionStatus::Failed,
            ..
        })
    ));
}

#[test]
fn failed_and_completed_missions_do_not_block_others() {
    let mut session = two_missions();
    session.start(MissionId(1), t0()).expect("start");
    session
        .expire_if_due(MissionId(1), t0() + Duration::seconds(6))
        .expect("expire");
    assert_eq!(status(&session, 1), MissionStatus::Failed);

    assert_eq!(session.start(MissionId(2), t0()), Ok(Effect::Mutated));
}

#[test]
fn unknown_mission_is_rejected_without_change() {
    let mut session = two_missions();
    let err = session
        .start(MissionId(42), t0())
        .expect_err("unknown mission");
    assert_eq!(err, CommandError::UnknownMission(MissionId(42)));
    assert_eq!(err.code(), ErrorCode::UnknownMission);
    assert_eq!(session.revision(), 0);
    assert!(session.reset(MissionId(42)).is_err());
    assert!(session.complete(MissionId(42)).is_err());
    assert!(session.expire_if_due(MissionId(42), t0()).is_err());
}

#[test]
fn complete_is_idempotent_and_clears_deadline() {
    let mut session = two_missions();
    session.start(MissionId(1), t0()).expect("start");
    assert_eq!(session.complete(MissionId(1)), Ok(Effect::Mutated));
    assert_eq!(session.mission(MissionId(1)).expect("m").deadline(), None);
    let revision = session.revision();

    assert_eq!(session.complete(MissionId(1)), Ok(Effect::NoOp));
    assert_eq!(session.revision(), revision);
}

#[test]
fn complete_overrides_idle_and_failed_missions() {
    let mut session = two_missions();
    assert_eq!(session.complete(MissionId(2)), Ok(Effect::Mutated));
    assert_eq!(status(&session, 2), MissionStatus::Completed);

    session.start(MissionId(1), t0()).expect("start");
    session
        .expire_if_due(MissionId(1), t0() + Duration::seconds(5))
        .expect("expire");
    assert_eq!(session.complete(MissionId(1)), Ok(Effect::Mutated));
    assert_eq!(status(&session, 1), MissionStatus::Completed);
}

#[test]
fn expire_only_fails_active_missions_past_deadline() {
    let mut session = two_missions();
    assert_eq!(
        session.expire_if_due(MissionId(1), t0()),
        Ok(Expiry::NotActive(MissionStatus::Idle))
    );

    session.start(MissionId(1), t0()).expect("start");
    let deadline = t0() + Duration::seconds(5);
    assert_eq!(
        session.expire_if_due(MissionId(1), t0() + Duration::seconds(4)),
        Ok(Expiry::NotYetDue(deadline))
    );
    assert_eq!(status(&session, 1), MissionStatus::Active);

    assert_eq!(
        session.expire_if_due(MissionId(1), deadline),
        Ok(Expiry::Expired)
    );
    let mission = session.mission(MissionId(1)).expect("mission");
    assert_eq!(mission.status(), MissionStatus::Failed);
    assert_eq!(mission.deadline(), None);
}

#[test]
fn late_expiry_after_complete_is_a_no_op() {
    let mut session = two_missions();
    session.start(MissionId(1), t0()).expect("start");
    session.complete(MissionId(1)).expect("complete");
    let revision = session.revision();

    assert_eq!(
        session.expire_if_due(MissionId(1), t0() + Duration::seconds(60)),
        Ok(Expiry::NotActive(MissionStatus::Completed))
    );
    assert_eq!(status(&session, 1), MissionStatus::Completed);
    assert_eq!(session.revision(), revision);
}

#[test]
fn reset_returns_terminal_missions_to_idle_and_allows_restart() {
    let mut session = two_missions();
    session.start(MissionId(1), t0()).expect("start");
    session
        .expire_if_due(MissionId(1), t0() + Duration::seconds(6))
        .expect("expire");
    assert_eq!(session.reset(MissionId(1)), Ok(Effect::Mutated));
    assert_eq!(status(&session, 1), MissionStatus::Idle);
    assert_eq!(session.start(MissionId(1), t0()), Ok(Effect::Mutated));

    session.complete(MissionId(1)).expect("complete");
    session.reset(MissionId(1)).expect("reset");
    assert_eq!(session.start(MissionId(1), t0()), Ok(Effect::Mutated));
}

#[test]
fn reset_of_idle_mission_is_a_no_op() {
    let mut session = two_missions();
    assert_eq!(session.reset(MissionId(2)), Ok(Effect::NoOp));
    assert_eq!(session.reset_all(), Ok(Effect::NoOp));
    assert_eq!(session.revision(), 0);
}

#[test]
fn reset_all_bumps_revision_once() {
    let mut session = two_missions();
    session.start(MissionId(1), t0()).expect("start");
    session.complete(MissionId(2)).expect("complete");
    let revision = session.revision();

    assert_eq!(session.reset_all(), Ok(Effect::Mutated));
    assert_eq!(session.revision(), revision + 1);
    assert!(session
        .missions()
        .all(|mission| mission.status() == MissionStatus::Idle && mission.deadline().is_none()));
}

#[test]
fn failing_step_leaves_session_untouched() {
    let mut session = two_missions();
    session.start(MissionId(1), t0()).expect("start");
    session.complete(MissionId(2)).expect("complete");
    let before = session.snapshot(t0());

    let result = session.apply_all(|mission| {
        if mission.id() == MissionId(2) {
            return Err(CommandError::UnknownMission(mission.id()));
        }
        Ok(mission.reset())
    });

    assert!(result.is_err());
    assert_eq!(session.snapshot(t0()), before);
    assert_eq!(status(&session, 1), MissionStatus::Active);
}

#[test]
fn snapshot_reports_remaining_seconds_for_active_mission_only() {
    let mut session = two_missions();
    session.start(MissionId(1), t0()).expect("start");

    let snapshot = session.snapshot(t0() + Duration::milliseconds(1_500));
    let active = snapshot.mission(MissionId(1)).expect("mission 1");
    assert_eq!(active.seconds_remaining, Some(4));
    assert_eq!(active.deadline, Some(t0() + Duration::seconds(5)));
    let idle = snapshot.mission(MissionId(2)).expect("mission 2");
    assert_eq!(idle.seconds_remaining, None);
    assert_eq!(idle.deadline, None);
    assert_eq!(snapshot.session_id, session.session_id());
}

#[test]
fn oversized_time_limit_saturates_deadline_instead_of_panicking() {
    let mut session = two_missions();
    for limit in [i64::MAX as u64, u64::MAX, 100_000_000_000_000_000] {
        session.reset_all().expect("reset");
        session
            .missions
            .get_mut(&MissionId(1))
            .expect("mission")
            .time_limit_seconds = limit;

        assert_eq!(session.start(MissionId(1), t0()), Ok(Effect::Mutated));
        let mission = session.mission(MissionId(1)).expect("mission");
        assert_eq!(mission.status(), MissionStatus::Active);
        assert_eq!(mission.deadline(), Some(DateTime::<Utc>::MAX_UTC));
        assert!(session.invariant_violation().is_none());
    }
}
