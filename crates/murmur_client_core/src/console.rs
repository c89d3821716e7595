#![forbid(unsafe_code)]

//! Line commands understood by the interactive client.

pub const CLIENT_HELP: &str = "Commands available:\n\
\thelp          This help message\n\
\tconnect       Connect to the server\n\
\tsend [text]   Send a message (without text, the next line is sent)\n\
\texit          Quit the session";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
	Help,
	Connect,
	/// `None` means the body follows on the next input line.
	Send(Option<String>),
	Exit,
	Empty,
}

pub fn parse_client_command(line: &str) -> Result<ClientCommand, String> {
	let trimmed = line.trim_start();
	let (cmd, rest) = match trimmed.split_once(char::is_whitespace) {
		Some((cmd, rest)) => (cmd, rest),
		None => (trimmed.trim_end(), ""),
	};

	match cmd {
		"" => Ok(ClientCommand::Empty),
		"help" => Ok(ClientCommand::Help),
		"connect" => Ok(ClientCommand::Connect),
		"send" => {
			// Separator whitespace is dropped; inner and trailing spaces are body.
			let body = rest.trim_start();
			let body = body.strip_suffix('\n').unwrap_or(body);
			let body = body.strip_suffix('\r').unwrap_or(body);
			if body.trim().is_empty() {
				Ok(ClientCommand::Send(None))
			} else {
				Ok(ClientCommand::Send(Some(body.to_string())))
			}
		}
		"exit" | "quit" => Ok(ClientCommand::Exit),
		other => Err(format!("unknown command: {other} (try `help`)")),
	}
}
