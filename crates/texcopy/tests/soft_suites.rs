use texcopy::{plan, run_case, CheckMethod, InitMethod, SoftEngine, Suite};

#[test]
fn every_suite_passes_on_soft_engine() {
    let mut engine = SoftEngine::new();
    for suite in Suite::ALL {
        let plan = plan(suite, &engine).unwrap();
        assert!(!plan.runnable.is_empty(), "{suite} has nothing to run");
        for case in &plan.runnable {
            let outcome = pollster::block_on(run_case(&mut engine, case))
                .unwrap_or_else(|err| panic!("{suite}: {case}: {err}"));
            assert!(
                outcome.passed(),
                "{suite}: {case}: {:?}",
                outcome.report.mismatches
            );
        }
        assert_eq!(engine.live_resources(), 0, "{suite} leaked resources");
    }
}

#[test]
fn init_method_does_not_change_what_each_check_sees() {
    let mut engine = SoftEngine::new();
    let cases = Suite::CopyRegionWithOrigin.cases().unwrap();
    for check in CheckMethod::ALL {
        let mut per_init = Vec::new();
        for init in InitMethod::ALL {
            let reports: Vec<_> = cases
                .iter()
                .filter(|c| c.init == init && c.check == check)
                .map(|c| {
                    let outcome = pollster::block_on(run_case(&mut engine, c)).unwrap();
                    (
                        outcome.passed(),
                        outcome.report.rows_compared,
                        outcome.report.bytes_compared,
                    )
                })
                .collect();
            per_init.push(reports);
        }
        assert_eq!(per_init[0], per_init[1], "{check}");
    }
}
