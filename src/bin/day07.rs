use std::collections::HashMap;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::fs;
use std::io;
use std::io::prelude::*;
use std::str::FromStr;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use nom::{
    character::complete::{char, digit1, multispace0},
    combinator::map_res,
    multi::separated_list1,
    sequence::terminated,
    IResult,
};
use tracing::{event, span, Level};
use tracing_subscriber::prelude::*;

const SAMPLE_INPUT: &str = "16,1,2,0,4,2,7,1,2,14\n";
const PART1_SAMPLE_ANSWER: usize = 37;
const PART2_SAMPLE_ANSWER: usize = 168;
const SAMPLE_TIMEOUT: Duration = Duration::from_secs(5);
const PART_TIMEOUT: Duration = Duration::from_secs(5 * 1000);

type CostOfMove = fn(usize, usize) -> usize;
type SampleCheck = (u8, fn(&str) -> Result<Minimum, BadInput>, usize);

const SAMPLE_CHECKS: [SampleCheck; 2] = [
    (1, solve_part1, PART1_SAMPLE_ANSWER),
    (2, solve_part2, PART2_SAMPLE_ANSWER),
];

#[derive(Debug, PartialEq, Eq)]
pub struct BadInput {
    input: String,
    message: String,
}

impl Display for BadInput {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "bad input '{}': {}", self.input, self.message)
    }
}

impl Error for BadInput {}

fn usize_parser(input: &str) -> IResult<&str, usize> {
    map_res(digit1, FromStr::from_str)(input)
}

fn parse_position_list(input: &str) -> IResult<&str, Vec<usize>> {
    terminated(separated_list1(char(','), usize_parser), multispace0)(input)
}

fn parse_positions(input: &str) -> Result<Vec<usize>, BadInput> {
    let first_line = match input.lines().next() {
        Some(line) => line,
        None => {
            return Err(BadInput {
                input: input.to_string(),
                message: "empty input".to_string(),
            });
        }
    };
    match parse_position_list(first_line) {
        Ok((tail, positions)) => {
            if tail.is_empty() {
                Ok(positions)
            } else {
                Err(BadInput {
                    input: first_line.to_string(),
                    message: format!("unexpected trailing junk '{}'", tail),
                })
            }
        }
        Err(e) => Err(BadInput {
            input: first_line.to_string(),
            message: e.to_string(),
        }),
    }
}

#[test]
fn test_parse_positions() {
    assert_eq!(
        parse_positions(SAMPLE_INPUT),
        Ok(vec![16, 1, 2, 0, 4, 2, 7, 1, 2, 14])
    );
    assert_eq!(parse_positions("3"), Ok(vec![3]));
    // Only the first line counts.
    assert_eq!(parse_positions("1,2\n3,4\n"), Ok(vec![1, 2]));
    assert!(parse_positions("").is_err());
    assert!(parse_positions("\n").is_err());
    assert!(parse_positions("16,x,2").is_err());
    assert!(parse_positions("16,1,").is_err());
    assert!(parse_positions("-1,2").is_err());
}

fn inorder(from: usize, to: usize) -> (usize, usize) {
    if from > to {
        (to, from)
    } else {
        (from, to)
    }
}

fn cost_of_move_part1(from: usize, to: usize) -> usize {
    let (from, to) = inorder(from, to);
    to - from
}

#[test]
fn test_cost_of_move_part1() {
    assert_eq!(cost_of_move_part1(4, 4), 0);
    assert_eq!(cost_of_move_part1(16, 2), 14);
    assert_eq!(cost_of_move_part1(2, 16), 14);
}

fn triangular(n: usize) -> usize {
    n * (n + 1) / 2
}

fn cost_of_move_part2(from: usize, to: usize) -> usize {
    let (from, to) = inorder(from, to);
    triangular(to - from)
}

#[test]
fn test_cost_of_move_part2() {
    assert_eq!(cost_of_move_part2(1, 1), 0);
    assert_eq!(cost_of_move_part2(2, 2), 0);
    assert_eq!(cost_of_move_part2(1, 2), 1);
    assert_eq!(cost_of_move_part2(3, 2), 1);
    assert_eq!(cost_of_move_part2(1, 3), 1 + 2);
    assert_eq!(cost_of_move_part2(1, 4), 1 + 2 + 3);
    assert_eq!(cost_of_move_part2(16, 5), 66);
}

fn cost_of_dest(dest: usize, positions: &[usize], cost_of_move: CostOfMove) -> usize {
    positions.iter().map(|pos| cost_of_move(*pos, dest)).sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Minimum {
    target: usize,
    cost: usize,
}

/// Finds the cheapest target for a set of positions.
///
/// The total cost of a target is assumed to be convex in the target, so
/// the search narrows the bracket towards whichever neighbour of the
/// midpoint is cheaper.  Costs are memoized per target for the lifetime of
/// the solver.
struct Solver<'a> {
    positions: &'a [usize],
    cost_of_move: CostOfMove,
    costs: HashMap<usize, usize>,
}

impl<'a> Solver<'a> {
    fn new(positions: &'a [usize], cost_of_move: CostOfMove) -> Solver<'a> {
        Solver {
            positions,
            cost_of_move,
            costs: HashMap::new(),
        }
    }

    fn cost(&mut self, dest: usize) -> usize {
        let positions = self.positions;
        let cost_of_move = self.cost_of_move;
        *self
            .costs
            .entry(dest)
            .or_insert_with(|| cost_of_dest(dest, positions, cost_of_move))
    }

    #[cfg(test)]
    fn evaluated(&self) -> usize {
        self.costs.len()
    }

    fn optimum(&mut self) -> Option<Minimum> {
        let low = *self.positions.iter().min()?;
        let high = *self.positions.iter().max()?;
        Some(self.optimum_between(low, high))
    }

    // Neighbours outside [low, high] are never looked at; every narrowing
    // step only discards targets strictly worse than one we keep.
    fn optimum_between(&mut self, low: usize, high: usize) -> Minimum {
        debug_assert!(low <= high);
        let mid = (low + high) / 2;
        let here = self.cost(mid);
        event!(Level::DEBUG, low, high, mid, cost = here, "narrowing");
        if mid < high && here > self.cost(mid + 1) {
            self.optimum_between(mid + 1, high)
        } else if mid > low && here > self.cost(mid - 1) {
            self.optimum_between(low, mid - 1)
        } else {
            Minimum {
                target: mid,
                cost: here,
            }
        }
    }
}

#[cfg(test)]
const COST_MODELS: [CostOfMove; 2] = [cost_of_move_part1, cost_of_move_part2];

#[cfg(test)]
fn brute_force(positions: &[usize], cost_of_move: CostOfMove) -> Option<Minimum> {
    let min_pos = *positions.iter().min()?;
    let max_pos = *positions.iter().max()?;

    let mut best: Option<Minimum> = None;
    for pos in min_pos..=max_pos {
        let cost = cost_of_dest(pos, positions, cost_of_move);
        best = match best {
            Some(b) if b.cost <= cost => Some(b),
            _ => Some(Minimum { target: pos, cost }),
        };
    }
    best
}

/// The puzzle answer is the `cost` of the returned minimum.
fn solve(input: &str, cost_of_move: CostOfMove) -> Result<Minimum, BadInput> {
    let positions = parse_positions(input)?;
    match Solver::new(&positions, cost_of_move).optimum() {
        Some(m) => Ok(m),
        None => Err(BadInput {
            input: input.to_string(),
            message: "no positions".to_string(),
        }),
    }
}

fn solve_part1(input: &str) -> Result<Minimum, BadInput> {
    solve(input, cost_of_move_part1)
}

fn solve_part2(input: &str) -> Result<Minimum, BadInput> {
    solve(input, cost_of_move_part2)
}

#[test]
fn test_sample() {
    assert_eq!(
        solve_part1(SAMPLE_INPUT),
        Ok(Minimum {
            target: 2,
            cost: PART1_SAMPLE_ANSWER
        })
    );
    assert_eq!(
        solve_part2(SAMPLE_INPUT),
        Ok(Minimum {
            target: 5,
            cost: PART2_SAMPLE_ANSWER
        })
    );
}

#[test]
fn test_all_in_one_place() {
    for cost_of_move in COST_MODELS {
        let m = Solver::new(&[5, 5, 5], cost_of_move).optimum();
        assert_eq!(m, Some(Minimum { target: 5, cost: 0 }));
    }
}

#[test]
fn test_single_position_at_zero() {
    let mut solver = Solver::new(&[0], cost_of_move_part2);
    assert_eq!(solver.optimum(), Some(Minimum { target: 0, cost: 0 }));
    assert_eq!(solver.evaluated(), 1);
}

#[test]
fn test_two_positions() {
    let positions = [0, 10];
    let m1 = Solver::new(&positions, cost_of_move_part1).optimum().unwrap();
    assert_eq!(m1.cost, 10);
    assert!(m1.target <= 10);

    let m2 = Solver::new(&positions, cost_of_move_part2).optimum().unwrap();
    assert_eq!(Some(m2), brute_force(&positions, cost_of_move_part2));
    assert_eq!(m2, Minimum { target: 5, cost: 30 });
}

#[test]
fn test_no_positions() {
    assert_eq!(Solver::new(&[], cost_of_move_part1).optimum(), None);
    assert!(solve_part1("\n").is_err());
}

#[test]
fn test_idempotent() {
    let positions = parse_positions(SAMPLE_INPUT).unwrap();
    for cost_of_move in COST_MODELS {
        let first = Solver::new(&positions, cost_of_move).optimum();
        let second = Solver::new(&positions, cost_of_move).optimum();
        assert_eq!(first, second);
    }
}

#[test]
fn test_no_worse_than_any_position() {
    let positions = parse_positions(SAMPLE_INPUT).unwrap();
    let mut solver = Solver::new(&positions, cost_of_move_part1);
    let best = solver.optimum().unwrap();
    for pos in positions.iter() {
        assert!(best.cost <= solver.cost(*pos));
    }
}

#[test]
fn test_memoized() {
    let positions = [0, 3, 1000, 17, 999, 500, 2];
    for cost_of_move in COST_MODELS {
        let mut solver = Solver::new(&positions, cost_of_move);
        let best = solver.optimum().unwrap();
        assert_eq!(Some(best), brute_force(&positions, cost_of_move));
        assert!(solver.evaluated() < 100, "evaluated {}", solver.evaluated());
        let before = solver.evaluated();
        assert_eq!(solver.cost(best.target), best.cost);
        assert_eq!(solver.evaluated(), before);
    }
}

#[cfg(test)]
mod search_agrees_with_scan {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn test_matches_brute_force(positions in prop::collection::vec(0usize..200, 1..20)) {
            for cost_of_move in COST_MODELS {
                let got = Solver::new(&positions, cost_of_move).optimum().unwrap();
                let want = brute_force(&positions, cost_of_move).unwrap();
                prop_assert_eq!(got.cost, want.cost);
                prop_assert_eq!(cost_of_dest(got.target, &positions, cost_of_move), got.cost);
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum JobFailure {
    TimedOut(Duration),
    Panicked,
}

impl Display for JobFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            JobFailure::TimedOut(limit) => write!(f, "timed out after {:?}", limit),
            JobFailure::Panicked => f.write_str("solver panicked"),
        }
    }
}

fn with_timeout<T, F>(limit: Duration, job: F) -> Result<T, JobFailure>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver is gone if we already gave up waiting.
        let _ = tx.send(job());
    });
    // A job that panics drops the sender without sending.
    match rx.recv_timeout(limit) {
        Ok(value) => Ok(value),
        Err(RecvTimeoutError::Timeout) => Err(JobFailure::TimedOut(limit)),
        Err(RecvTimeoutError::Disconnected) => Err(JobFailure::Panicked),
    }
}

#[test]
fn test_with_timeout() {
    assert_eq!(with_timeout(Duration::from_secs(5), || 6 * 7), Ok(42));
    assert_eq!(
        with_timeout(Duration::from_millis(10), || {
            thread::sleep(Duration::from_secs(2));
            0
        }),
        Err(JobFailure::TimedOut(Duration::from_millis(10)))
    );
}

#[test]
fn test_with_timeout_panicking_job() {
    let start = Instant::now();
    let result: Result<usize, JobFailure> =
        with_timeout(Duration::from_secs(5), || panic!("solver blew up"));
    assert_eq!(result, Err(JobFailure::Panicked));
    assert!(start.elapsed() < Duration::from_secs(5));
}

fn check_sample(checks: &[SampleCheck]) -> Result<(), String> {
    for &(part, solver, expected) in checks {
        match with_timeout(SAMPLE_TIMEOUT, move || solver(SAMPLE_INPUT)) {
            Err(failure) => {
                return Err(format!("part {} sample: {}", part, failure));
            }
            Ok(Err(e)) => {
                return Err(format!("part {} sample: {}", part, e));
            }
            Ok(Ok(m)) if m.cost != expected => {
                return Err(format!(
                    "part {} sample: expected {}, got {}",
                    part, expected, m.cost
                ));
            }
            Ok(Ok(_)) => {
                println!("Day 7 part {} sample: ok", part);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
fn exploding_solver(_input: &str) -> Result<Minimum, BadInput> {
    panic!("this solver should not have been run");
}

#[cfg(test)]
fn refusing_solver(input: &str) -> Result<Minimum, BadInput> {
    Err(BadInput {
        input: input.to_string(),
        message: "refused".to_string(),
    })
}

#[test]
fn test_check_sample() {
    assert_eq!(check_sample(&SAMPLE_CHECKS), Ok(()));
}

#[test]
fn test_check_sample_stops_at_first_mismatch() {
    let checks: [SampleCheck; 2] = [
        (1, solve_part1, PART1_SAMPLE_ANSWER - 1),
        (2, exploding_solver, PART2_SAMPLE_ANSWER),
    ];
    assert_eq!(
        check_sample(&checks),
        Err(format!(
            "part 1 sample: expected {}, got {}",
            PART1_SAMPLE_ANSWER - 1,
            PART1_SAMPLE_ANSWER
        ))
    );
}

#[test]
fn test_check_sample_failures() {
    let checks: [SampleCheck; 1] = [(1, refusing_solver, PART1_SAMPLE_ANSWER)];
    let e = check_sample(&checks).unwrap_err();
    assert!(e.starts_with("part 1 sample: bad input"), "{}", e);
    assert!(e.ends_with("refused"), "{}", e);

    let checks: [SampleCheck; 2] = [
        (1, solve_part1, PART1_SAMPLE_ANSWER),
        (2, exploding_solver, PART2_SAMPLE_ANSWER),
    ];
    assert_eq!(
        check_sample(&checks),
        Err("part 2 sample: solver panicked".to_string())
    );
}

fn run_part(part: u8, positions: &[usize], cost_of_move: CostOfMove) -> Result<(), String> {
    let span = span!(Level::INFO, "part", part);
    let _enter = span.enter();

    let owned = positions.to_vec();
    let start = Instant::now();
    let result = with_timeout(PART_TIMEOUT, move || {
        Solver::new(&owned, cost_of_move).optimum()
    });
    let elapsed = start.elapsed();
    match result {
        Err(failure) => {
            event!(Level::WARN, ?elapsed, %failure, "no answer from the solver");
            Err(format!("Day 7 part {}: {}", part, failure))
        }
        Ok(None) => Err("No submarines.  Nothing to do.".to_string()),
        Ok(Some(m)) => {
            println!("Day 7 part {}: dest {} costs {}", part, m.target, m.cost);
            println!("took: {:.2}ms", elapsed.as_secs_f64() * 1000.0);
            Ok(())
        }
    }
}

fn read_input() -> Result<String, String> {
    match std::env::args().nth(1) {
        Some(path) => {
            fs::read_to_string(&path).map_err(|e| format!("failed to read {}: {}", path, e))
        }
        None => {
            let mut input = String::new();
            match io::stdin().read_to_string(&mut input) {
                Ok(_) => Ok(input),
                Err(e) => Err(format!("failed to read input: {}", e)),
            }
        }
    }
}

fn run() -> Result<(), String> {
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    let filter_layer = match tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
    {
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
        Ok(layer) => layer,
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    check_sample(&SAMPLE_CHECKS)?;

    let input = read_input()?;
    let positions = parse_positions(input.as_str()).map_err(|e| e.to_string())?;
    event!(Level::INFO, count = positions.len(), "read positions");
    run_part(1, &positions, cost_of_move_part1)?;
    run_part(2, &positions, cost_of_move_part2)
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
