extern crate attacks;

use attacks::errors::{run_scenario, Result};
use attacks::{cbc, ctr, ecb};

fn main() {
    let scenarios: Vec<(&str, fn() -> Result<()>)> = vec![
        ("detect hidden block mode", ecb::run_mode_detection),
        ("recover codebook suffix", ecb::run_suffix_recovery),
        ("recover codebook suffix behind random prefix", ecb::run_prefixed_suffix_recovery),
        ("forge admin profile by block splicing", ecb::run_profile_forgery),
        ("forge admin cookie by bit-flipping", cbc::run_cookie_forgery),
        ("recover key reused as iv", cbc::run_key_recovery),
        ("decrypt with a padding oracle", cbc::run_padding_oracle),
        ("recover counter-mode plaintext via edits", ctr::run_edit_recovery),
        ("forge admin cookie in counter mode", ctr::run_cookie_forgery),
        ("recover keystream from nonce reuse", ctr::run_nonce_reuse),
    ];

    for (name, scenario) in scenarios {
        run_scenario(scenario, name);
    }
}
