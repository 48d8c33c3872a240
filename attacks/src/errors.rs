use std::fmt::Debug;

pub use failure::Error;

pub type Result<T> = ::std::result::Result<T, Error>;

/// Terminal attack failures. Hitting one of these means the oracle stopped
/// behaving the way the attack's model assumes; a wrong byte is never
/// silently emitted instead.
#[derive(Debug, Fail)]
pub enum AttackError {
    #[fail(display = "every candidate byte was rejected at position {}", position)]
    OracleExhausted { position: usize },

    #[fail(display = "only ambiguous padding matches at position {}", position)]
    AmbiguousPaddingMatch { position: usize },

    #[fail(display = "attack exceeded its budget of {} oracle queries", budget)]
    QueryBudgetExceeded { budget: usize },
}

pub fn compare_eq<T>(expected: T, found: T) -> Result<()>
where
    T: PartialEq + Debug,
{
    if expected == found {
        Ok(())
    } else {
        bail!("expected {:?}, found {:?}", expected, found)
    }
}

/// Runs one attack scenario and reports its outcome.
pub fn run_scenario<F>(scenario: F, name: &str)
where
    F: Fn() -> Result<()>,
{
    match scenario() {
        Ok(()) => println!("{}: ok", name),
        Err(e) => {
            println!("{}: FAILED: {}", name, e);
            for cause in e.iter_causes() {
                println!("    caused by: {}", cause);
            }
        }
    }
}
