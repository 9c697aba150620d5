use anyhow::Result;

fn main() -> Result<()> {
    evalbox::wrapper::main_entry()
}
