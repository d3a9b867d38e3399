//! One-time email verification codes.

use rand::Rng;

/// Number of decimal digits in a code.
pub const OTP_LENGTH: usize = 6;

/// Generate a zero-padded six digit code.
pub fn generate_otp() -> String {
    let code: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{code:06}")
}
