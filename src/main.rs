use anyhow::Result;
use lapwatch::infra::MainProgram;

#[tokio::main]
async fn main() -> Result<()> {
    let mut program = MainProgram::new(std::env::args().skip(1))?;
    program.run().await?;
    Ok(())
}
