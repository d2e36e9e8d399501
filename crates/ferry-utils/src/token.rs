use crate::cli::TokenArgs;
use eyre::{Context, Result};
use ferry_core::ContinuationToken;

pub fn run_token(args: TokenArgs) -> Result<()> {
    let token = ContinuationToken::decode(args.token.trim())
        .with_context(|| format!("decoding token '{}'", args.token))?;
    println!("kind: {}", token.kind());
    println!("{}", serde_json::to_string_pretty(&token)?);
    Ok(())
}
