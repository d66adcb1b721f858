use std::io::{self, BufRead, Write};

use nfldap::crypto::passwords;

fn read_password(prompt: &str) -> io::Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn main() -> anyhow::Result<()> {
    let password = read_password("Enter password: ")?;
    let check = read_password("Re-enter password: ")?;
    if password != check {
        eprintln!("Passwords do not match!");
        std::process::exit(1);
    }

    println!("{}", passwords::hash(&password));
    Ok(())
}
