//! End-to-end tests for the queue → worker → retry → dead-letter pipeline.
//!
//! Verifies:
//! - Attempt accounting and exactly-once dead-lettering
//! - Resurrection resets retry state and re-queues under the same id
//! - Single-consumer FIFO and multi-consumer delivery uniqueness

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use chrono::Utc;

    use herald_core::Job;

    use crate::jobs::{BackoffSchedule, JobOutcome, JobSystem, Processed, Worker};
    use crate::store::InMemoryStore;

    type Store = Arc<InMemoryStore>;

    const T: Duration = Duration::from_millis(20);

    fn system() -> JobSystem<Store> {
        // Zero backoff so promoted retries are immediately due.
        JobSystem::new(InMemoryStore::arc(), "notifications", BackoffSchedule::fixed(Duration::ZERO))
    }

    /// Worker whose `email` handler fails with the next scripted error.
    fn scripted_worker(system: &JobSystem<Store>, errors: &[&str]) -> Worker<Store> {
        let script = Arc::new(Mutex::new(
            errors.iter().rev().map(|e| e.to_string()).collect::<Vec<_>>(),
        ));
        let mut worker = system.worker();
        worker.register_handler("email", move |_job| match script.lock().unwrap().pop() {
            Some(err) => JobOutcome::Failed(err),
            None => JobOutcome::Delivered,
        });
        worker
    }

    /// Run the worker until the queue and retry schedule are both idle.
    fn drain(system: &JobSystem<Store>, worker: &Worker<Store>) -> Vec<Processed> {
        let mut outcomes = Vec::new();
        loop {
            worker.promote_due(100).unwrap();
            match worker.process_one(T).unwrap() {
                Some(report) => outcomes.push(report.outcome),
                None if system.schedule().is_empty().unwrap() => return outcomes,
                None => {}
            }
        }
    }

    fn j1() -> Job {
        Job::builder("email", 7)
            .id("j1")
            .max_attempts(3)
            .field("subject", "welcome")
            .build()
            .unwrap()
    }

    /// Drives `j1` into the dead-letter store: with a budget of 3 the job is
    /// tried once and retried three times before it is dead-lettered.
    fn dead_letter_j1(system: &JobSystem<Store>) -> Vec<Processed> {
        let worker = scripted_worker(system, &["e1", "e2", "e3", "e4"]);
        system.queue().enqueue(&j1()).unwrap();
        drain(system, &worker)
    }

    #[test]
    fn scenario_a_exhausted_job_is_dead_lettered() {
        let system = system();
        let outcomes = dead_letter_j1(&system);

        assert_eq!(
            outcomes,
            vec![
                Processed::Retried { attempt: 1, delay: Duration::ZERO },
                Processed::Retried { attempt: 2, delay: Duration::ZERO },
                Processed::Retried { attempt: 3, delay: Duration::ZERO },
                Processed::DeadLettered { attempt: 4 },
            ]
        );

        assert_eq!(system.queue().size().unwrap(), 0);
        assert!(system.schedule().is_empty().unwrap());

        let dead = system.dead_letters().list().unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, "j1");
        assert_eq!(dead[0].attempt, 4);
        assert_eq!(dead[0].last_error.as_deref(), Some("e4"));
        assert!(dead[0].failed_at.is_some());
    }

    #[test]
    fn scenario_b_resurrection_requeues_clean_job() {
        let system = system();
        dead_letter_j1(&system);
        let before = system.dead_letters().count().unwrap();

        assert!(system.dead_letters().resurrect_one("j1").unwrap());
        assert_eq!(system.dead_letters().count().unwrap(), before - 1);

        let job = system.queue().dequeue(T).unwrap().unwrap();
        assert_eq!(job.id, "j1");
        assert_eq!(job.attempt, 0);
        assert!(job.last_error.is_none());
        assert!(job.failed_at.is_none());
        assert_eq!(job.payload, j1().payload);
    }

    #[test]
    fn scenario_c_unknown_id_is_a_plain_negative() {
        let system = system();
        dead_letter_j1(&system);
        let stats_before = system.stats().unwrap();

        assert!(!system.dead_letters().resurrect_one("does-not-exist").unwrap());
        assert_eq!(system.stats().unwrap(), stats_before);
    }

    #[test]
    fn scenario_d_single_consumer_is_fifo() {
        let system = system();
        let ids: Vec<String> = (0..5).map(|i| format!("job-{i}")).collect();
        for id in &ids {
            let job = Job::builder("email", 1).id(id.as_str()).build().unwrap();
            system.queue().enqueue(&job).unwrap();
        }

        let mut seen = Vec::new();
        while let Some(job) = system.queue().dequeue(T).unwrap() {
            seen.push(job.id.to_string());
        }
        assert_eq!(seen, ids);
    }

    #[test]
    fn attempt_grows_by_one_per_failure_and_not_on_success() {
        let system = system();
        let worker = scripted_worker(&system, &["e1", "e2"]);
        system.queue().enqueue(&j1()).unwrap();

        let mut attempts = Vec::new();
        loop {
            worker.promote_due(100).unwrap();
            let Some(report) = worker.process_one(T).unwrap() else {
                if system.schedule().is_empty().unwrap() {
                    break;
                }
                continue;
            };
            attempts.push(report.outcome);
        }

        assert_eq!(
            attempts,
            vec![
                Processed::Retried { attempt: 1, delay: Duration::ZERO },
                Processed::Retried { attempt: 2, delay: Duration::ZERO },
                Processed::Delivered,
            ]
        );
        assert_eq!(system.dead_letters().count().unwrap(), 0);
    }

    #[test]
    fn resurrected_job_can_be_dead_lettered_again_exactly_once() {
        let system = system();
        dead_letter_j1(&system);
        system.dead_letters().resurrect_all().unwrap();

        let worker = scripted_worker(&system, &["f1", "f2", "f3", "f4"]);
        drain(&system, &worker);

        let dead = system.dead_letters().list().unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].last_error.as_deref(), Some("f4"));
        assert_eq!(system.queue().size().unwrap(), 0);
    }

    #[test]
    fn concurrent_consumers_never_share_a_job() {
        const JOBS: usize = 200;
        const CONSUMERS: usize = 8;

        let system = system();
        for i in 0..JOBS {
            let job = Job::builder("push", i as i64).id(format!("job-{i}")).build().unwrap();
            system.queue().enqueue(&job).unwrap();
        }

        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let queue = system.queue().clone();
                thread::spawn(move || {
                    let mut got = Vec::new();
                    while let Some(job) = queue.dequeue(Duration::from_millis(50)).unwrap() {
                        got.push(job.id.to_string());
                    }
                    got
                })
            })
            .collect();

        let all: Vec<String> = consumers
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let unique: HashSet<&String> = all.iter().collect();

        assert_eq!(all.len(), JOBS, "every job delivered once");
        assert_eq!(unique.len(), JOBS, "no job delivered twice");
    }

    #[test]
    fn retry_survives_restart_of_the_process() {
        let store = InMemoryStore::arc();
        let first = JobSystem::new(store.clone(), "q", BackoffSchedule::fixed(Duration::ZERO));
        let mut worker = first.worker();
        worker.register_handler("email", |_job| JobOutcome::failed("smtp 421"));
        first.queue().enqueue(&j1()).unwrap();
        worker.process_one(T).unwrap();
        drop(worker);
        drop(first);

        // New "process": fresh components over the same store.
        let second = JobSystem::new(store, "q", BackoffSchedule::fixed(Duration::ZERO));
        assert_eq!(second.stats().unwrap().scheduled, 1);
        assert_eq!(
            second.schedule().promote_due(second.queue(), Utc::now(), 10).unwrap(),
            1
        );
        let job = second.queue().dequeue(T).unwrap().unwrap();
        assert_eq!(job.attempt, 1);
        assert_eq!(job.last_error.as_deref(), Some("smtp 421"));
    }
}
