//! Deterministic word-problem synthesis used whenever the AI backend cannot
//! serve a request.
//!
//! Every template is built so that the answer differs from each quantity
//! printed in the problem text, and the hints contain no numbers at all.

use rand::Rng;
use std::ops::RangeInclusive;

use crate::models::{ContentSource, Difficulty, OperationType, Problem};

pub const ADDITION_HINT: &str =
    "Put the two amounts together. Line up the digits by place value before you add.";
pub const SUBTRACTION_HINT: &str =
    "Start with the amount in the cash box and take away what was paid out.";
pub const MULTIPLICATION_HINT: &str =
    "Think of equal groups: multiply the number in one carton by the number of cartons.";
pub const DIVISION_HINT: &str =
    "Sharing equally means dividing the total by the number of pupils.";

const BASIC_OPERATIONS: [OperationType; 4] = [
    OperationType::Addition,
    OperationType::Subtraction,
    OperationType::Multiplication,
    OperationType::Division,
];

/// Operand ranges for one tier. Money ranges are in cents when
/// `money_in_cents` is set.
struct TierBounds {
    add_a: RangeInclusive<u32>,
    add_b: RangeInclusive<u32>,
    sub_a: RangeInclusive<u32>,
    money_in_cents: bool,
    mul_a: RangeInclusive<u32>,
    mul_b: RangeInclusive<u32>,
    div_divisor: RangeInclusive<u32>,
    div_quotient: RangeInclusive<u32>,
}

fn bounds(difficulty: Difficulty) -> TierBounds {
    match difficulty {
        Difficulty::Beginner => TierBounds {
            add_a: 1..=50,
            add_b: 1..=20,
            sub_a: 10..=50,
            money_in_cents: false,
            mul_a: 2..=7,
            mul_b: 2..=7,
            div_divisor: 2..=10,
            div_quotient: 2..=5,
        },
        Difficulty::Intermediate => TierBounds {
            add_a: 10..=60,
            add_b: 5..=40,
            sub_a: 20..=100,
            money_in_cents: false,
            mul_a: 2..=10,
            mul_b: 2..=10,
            div_divisor: 2..=10,
            div_quotient: 2..=10,
        },
        Difficulty::Advanced => TierBounds {
            add_a: 5_000..=30_000,
            add_b: 2_000..=20_000,
            sub_a: 10_000..=50_000,
            money_in_cents: true,
            mul_a: 5..=25,
            mul_b: 2..=20,
            div_divisor: 3..=20,
            div_quotient: 5..=25,
        },
        Difficulty::Expert => TierBounds {
            add_a: 10_000..=60_000,
            add_b: 5_000..=40_000,
            sub_a: 20_000..=100_000,
            money_in_cents: true,
            mul_a: 10..=40,
            mul_b: 5..=25,
            div_divisor: 5..=25,
            div_quotient: 10..=40,
        },
    }
}

/// Builds a problem without any external call. Total: never fails.
///
/// `Mixed` picks one of the four basic operations per call; the returned
/// problem still reports the operation that was requested.
pub fn fallback<R: Rng>(
    operation: OperationType,
    difficulty: Difficulty,
    rng: &mut R,
) -> Problem {
    let concrete = match operation {
        OperationType::Mixed => BASIC_OPERATIONS[rng.random_range(0..BASIC_OPERATIONS.len())],
        other => other,
    };
    let tier = bounds(difficulty);

    let (text, correct_answer, hint) = match concrete {
        OperationType::Addition => addition(&tier, rng),
        OperationType::Subtraction => subtraction(&tier, rng),
        OperationType::Multiplication => multiplication(&tier, rng),
        OperationType::Division | OperationType::Mixed => division(&tier, rng),
    };

    Problem {
        text,
        correct_answer,
        operation,
        difficulty,
        hint: hint.to_string(),
        source: ContentSource::Fallback,
    }
}

fn addition<R: Rng>(tier: &TierBounds, rng: &mut R) -> (String, f64, &'static str) {
    let a = rng.random_range(tier.add_a.clone());
    let b = rng.random_range(tier.add_b.clone());
    let text = format!(
        "Mei Ling saved {} in March and {} in April. How much money did she save altogether?",
        money(a, tier.money_in_cents),
        money(b, tier.money_in_cents)
    );
    (text, amount(a + b, tier.money_in_cents), ADDITION_HINT)
}

fn subtraction<R: Rng>(tier: &TierBounds, rng: &mut R) -> (String, f64, &'static str) {
    let a = rng.random_range(tier.sub_a.clone());
    // Keeping b strictly below half of a makes the difference larger than b.
    let b = rng.random_range(1..=((a - 1) / 2).max(1));
    let text = format!(
        "The school canteen had {} in its cash box. After paying the baker {}, how much money was left in the cash box?",
        money(a, tier.money_in_cents),
        money(b, tier.money_in_cents)
    );
    (text, amount(a - b, tier.money_in_cents), SUBTRACTION_HINT)
}

fn multiplication<R: Rng>(tier: &TierBounds, rng: &mut R) -> (String, f64, &'static str) {
    let per_carton = rng.random_range(tier.mul_a.clone());
    let cartons = rng.random_range(tier.mul_b.clone());
    let text = format!(
        "A bookshop packs {} books into each carton. How many books are there in {} cartons?",
        per_carton, cartons
    );
    (text, f64::from(per_carton * cartons), MULTIPLICATION_HINT)
}

fn division<R: Rng>(tier: &TierBounds, rng: &mut R) -> (String, f64, &'static str) {
    let divisor = rng.random_range(tier.div_divisor.clone());
    let mut quotient = rng.random_range(tier.div_quotient.clone());
    if quotient == divisor {
        quotient = if quotient < *tier.div_quotient.end() {
            quotient + 1
        } else {
            quotient - 1
        };
    }
    let dividend = quotient * divisor;
    let text = format!(
        "{} stickers are shared equally among {} pupils. How many stickers does each pupil get?",
        dividend, divisor
    );
    (text, f64::from(quotient), DIVISION_HINT)
}

fn money(value: u32, in_cents: bool) -> String {
    if in_cents {
        format!("${}.{:02}", value / 100, value % 100)
    } else {
        format!("${}", value)
    }
}

fn amount(value: u32, in_cents: bool) -> f64 {
    if in_cents {
        f64::from(value) / 100.0
    } else {
        f64::from(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::problem_service::{numbers_in, reveals_answer};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const ROUNDS: u64 = 300;

    fn tier_ceiling(difficulty: Difficulty) -> f64 {
        match difficulty {
            Difficulty::Beginner => 50.0,
            Difficulty::Intermediate => 100.0,
            Difficulty::Advanced => 500.0,
            Difficulty::Expert => 1000.0,
        }
    }

    #[test]
    fn division_always_has_exact_integer_quotient() {
        for difficulty in Difficulty::ALL {
            let mut rng = StdRng::seed_from_u64(7);
            for _ in 0..ROUNDS {
                let problem = fallback(OperationType::Division, difficulty, &mut rng);
                let numbers = numbers_in(&problem.text);
                assert_eq!(numbers.len(), 2, "{}", problem.text);
                let (dividend, divisor) = (numbers[0], numbers[1]);
                assert_eq!(dividend % divisor, 0.0, "{}", problem.text);
                assert_eq!(dividend / divisor, problem.correct_answer);
                assert_eq!(problem.correct_answer.fract(), 0.0);
            }
        }
    }

    #[test]
    fn beginner_addition_uses_documented_ranges() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..ROUNDS {
            let problem = fallback(OperationType::Addition, Difficulty::Beginner, &mut rng);
            let numbers = numbers_in(&problem.text);
            let (a, b) = (numbers[0], numbers[1]);
            assert!((1.0..=50.0).contains(&a));
            assert!((1.0..=20.0).contains(&b));
            assert_eq!(problem.correct_answer, a + b);
        }
    }

    #[test]
    fn answers_match_the_printed_quantities() {
        let mut rng = StdRng::seed_from_u64(3);
        for difficulty in Difficulty::ALL {
            for _ in 0..ROUNDS {
                let add = fallback(OperationType::Addition, difficulty, &mut rng);
                let n = numbers_in(&add.text);
                assert_eq!(add.correct_answer, typed(n[0] + n[1]));

                let sub = fallback(OperationType::Subtraction, difficulty, &mut rng);
                let n = numbers_in(&sub.text);
                assert_eq!(sub.correct_answer, typed(n[0] - n[1]));

                let mul = fallback(OperationType::Multiplication, difficulty, &mut rng);
                let n = numbers_in(&mul.text);
                assert_eq!(mul.correct_answer, n[0] * n[1]);
            }
        }
    }

    // Decimal answers are compared through their two-place printed form,
    // which is how a pupil would type them.
    fn typed(raw: f64) -> f64 {
        format!("{:.2}", raw).parse().unwrap()
    }

    #[test]
    fn answer_is_never_revealed_before_submission() {
        let mut rng = StdRng::seed_from_u64(42);
        for difficulty in Difficulty::ALL {
            for operation in BASIC_OPERATIONS.iter().copied().chain([OperationType::Mixed]) {
                for _ in 0..ROUNDS {
                    let problem = fallback(operation, difficulty, &mut rng);
                    assert!(
                        !reveals_answer(&problem.text, problem.correct_answer),
                        "{} reveals {}",
                        problem.text,
                        problem.correct_answer
                    );
                    assert!(!reveals_answer(&problem.hint, problem.correct_answer));
                }
            }
        }
    }

    #[test]
    fn printed_quantities_stay_within_tier_ceiling() {
        let mut rng = StdRng::seed_from_u64(5);
        for difficulty in Difficulty::ALL {
            for operation in BASIC_OPERATIONS {
                for _ in 0..ROUNDS {
                    let problem = fallback(operation, difficulty, &mut rng);
                    let ceiling = tier_ceiling(difficulty);
                    assert!(problem.correct_answer > 0.0);
                    for value in numbers_in(&problem.text) {
                        assert!(value <= ceiling, "{}", problem.text);
                    }
                }
            }
        }
    }

    #[test]
    fn advanced_money_problems_use_cents() {
        let mut rng = StdRng::seed_from_u64(9);
        let cents = regex::Regex::new(r"\$\d+\.\d{2}\b").unwrap();
        for operation in [OperationType::Addition, OperationType::Subtraction] {
            let problem = fallback(operation, Difficulty::Advanced, &mut rng);
            assert_eq!(cents.find_iter(&problem.text).count(), 2, "{}", problem.text);
            let rounded = (problem.correct_answer * 100.0).round() / 100.0;
            assert_eq!(rounded, problem.correct_answer);
        }
    }

    #[test]
    fn mixed_covers_every_operation() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut hints = std::collections::HashSet::new();
        for _ in 0..ROUNDS {
            let problem = fallback(OperationType::Mixed, Difficulty::Intermediate, &mut rng);
            assert_eq!(problem.operation, OperationType::Mixed);
            hints.insert(problem.hint);
        }
        assert_eq!(hints.len(), 4);
    }

    #[test]
    fn same_seed_gives_same_problem() {
        let a = fallback(
            OperationType::Mixed,
            Difficulty::Expert,
            &mut StdRng::seed_from_u64(99),
        );
        let b = fallback(
            OperationType::Mixed,
            Difficulty::Expert,
            &mut StdRng::seed_from_u64(99),
        );
        assert_eq!(a, b);
        assert_eq!(a.source, ContentSource::Fallback);
    }
}
