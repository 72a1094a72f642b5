//! services/client/src/shell.rs
//!
//! The interactive shell: the UI surface that renders session state and
//! dispatches user actions into the sync operations. Lines starting with
//! `/` are commands; anything else is sent as a chat message for the
//! currently opened subsection.

use crate::error::ClientError;
use crate::projects::ProjectsClient;
use gutachter_core::taxonomy;
use gutachter_core::{
    Assistant, ContextKey, ConversationEntry, ConversationKey, FilePayload, Role, StartOutcome,
    Topic,
};
use std::io::Write as _;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;

pub struct Shell {
    assistant: Arc<Assistant>,
    projects: ProjectsClient,
    project_id: Option<String>,
    topic: Topic,
    section: Option<String>,
    subsection: Option<String>,
}

impl Shell {
    pub fn new(assistant: Arc<Assistant>, projects: ProjectsClient) -> Self {
        Self {
            assistant,
            projects,
            project_id: None,
            topic: Topic::Baugrundgutachten,
            section: None,
            subsection: None,
        }
    }

    /// The main input loop. Returns when the user quits or stdin closes.
    pub async fn run(&mut self) -> Result<(), ClientError> {
        println!("Gutachter – geben Sie /help für eine Übersicht ein.");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            print!("> ");
            std::io::stdout().flush()?;
            let Some(line) = lines.next_line().await? else {
                break;
            };
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            if line == "/quit" {
                break;
            }
            self.dispatch(&line).await;
        }
        Ok(())
    }

    async fn dispatch(&mut self, line: &str) {
        if !line.starts_with('/') {
            self.send_message(line).await;
            return;
        }

        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        match (command, args.as_slice()) {
            ("/help", _) => print_help(),
            ("/login", [email, password]) => {
                if let Err(e) = self.projects.login(email, password).await {
                    error!("Login failed: {}", e);
                    banner("Anmeldung fehlgeschlagen. Bitte versuchen Sie es erneut.");
                }
            }
            ("/register", [email, password]) => {
                if let Err(e) = self.projects.register(email, password).await {
                    error!("Registration failed: {}", e);
                    banner("Registrierung fehlgeschlagen. Bitte versuchen Sie es erneut.");
                }
            }
            ("/logout", _) => {
                self.projects.logout();
                self.assistant.state().reset();
                self.project_id = None;
                self.section = None;
                self.subsection = None;
                println!("Abgemeldet; lokaler Zwischenspeicher geleert.");
            }
            ("/projects", _) => match self.projects.list().await {
                Ok(projects) => {
                    for project in projects {
                        println!(
                            "  {}  {}  {}",
                            project.id,
                            project.name,
                            project.description.unwrap_or_default()
                        );
                    }
                }
                Err(e) => {
                    error!("Listing projects failed: {}", e);
                    banner("Projekte konnten nicht geladen werden.");
                }
            },
            ("/project", ["new", rest @ ..]) if !rest.is_empty() => {
                let name = rest.join(" ");
                match self.projects.create(&name, None).await {
                    Ok(project) => println!("Projekt angelegt: {} ({})", project.name, project.id),
                    Err(e) => {
                        error!("Creating project failed: {}", e);
                        banner("Projekt konnte nicht angelegt werden.");
                    }
                }
            }
            ("/project", ["del", project_id]) => {
                if let Err(e) = self.projects.delete(project_id).await {
                    error!("Deleting project failed: {}", e);
                    banner("Projekt konnte nicht gelöscht werden.");
                }
            }
            ("/use", [project_id]) => {
                self.project_id = Some(project_id.to_string());
                println!("Aktives Projekt: {}", project_id);
            }
            ("/topic", [name]) => match name.parse::<Topic>() {
                Ok(topic) => {
                    self.topic = topic;
                    self.section = None;
                    self.subsection = None;
                    println!("Berichtsart: {}", topic);
                }
                Err(e) => banner(&e),
            },
            ("/sections", _) => self.print_sections(),
            ("/open", [section, subsection]) => {
                self.open_subsection(section, subsection).await;
            }
            ("/save", rest) if !rest.is_empty() => {
                self.save_subsection(&rest.join(" "), false).await;
            }
            ("/approve", rest) if !rest.is_empty() => {
                self.save_subsection(&rest.join(" "), true).await;
            }
            ("/attach", [path, rest @ ..]) => {
                let message = if rest.is_empty() {
                    None
                } else {
                    Some(rest.join(" "))
                };
                self.attach_file(path, message.as_deref()).await;
            }
            ("/upload", [path]) => self.upload_file(path, None, None).await,
            ("/upload", [path, section, subsection]) => {
                self.upload_file(path, Some(*section), Some(*subsection)).await;
            }
            ("/files", _) => self.list_files().await,
            ("/filestatus", [file_id]) => self.file_status(file_id).await,
            ("/delete", [file_id]) => self.delete_file(file_id).await,
            ("/pdf", _) => self.refresh_pdf().await,
            ("/download", [path]) => self.download(path).await,
            ("/cover", []) => self.show_cover_page().await,
            ("/cover", ["set", key, rest @ ..]) if !rest.is_empty() => {
                self.set_cover_field(key, &rest.join(" ")).await;
            }
            ("/reset", _) => {
                self.assistant.state().reset();
                println!("Lokaler Zwischenspeicher geleert.");
            }
            _ => banner("Unbekannter Befehl; /help zeigt alle Befehle."),
        }
    }

    // --- Selection Helpers ---

    fn context(&self) -> Option<ContextKey> {
        let project_id = self.project_id.as_ref()?;
        Some(ContextKey::new(project_id.clone(), self.topic))
    }

    /// The key of the currently opened subsection, if a document exists.
    fn conversation_key(&self) -> Option<ConversationKey> {
        let ctx = self.context()?;
        let document_id = self.assistant.state().document_id(&ctx)?;
        Some(ConversationKey::new(
            document_id,
            self.section.clone()?,
            self.subsection.clone()?,
        ))
    }

    fn current_document_id(&self) -> Option<String> {
        let ctx = self.context()?;
        self.assistant.state().document_id(&ctx)
    }

    // --- Conversation ---

    async fn open_subsection(&mut self, section: &str, subsection: &str) {
        let Some(ctx) = self.context() else {
            banner("Bitte zuerst mit /use ein Projekt wählen.");
            return;
        };
        if taxonomy::find_subsection(self.topic, section, subsection).is_none() {
            banner("Unbekannter Abschnitt; /sections zeigt die Struktur.");
            return;
        }
        self.section = Some(section.to_string());
        self.subsection = Some(subsection.to_string());

        match self
            .assistant
            .start_conversation(&ctx, section, subsection)
            .await
        {
            Ok(StartOutcome::Started) => {}
            Ok(StartOutcome::AlreadyActive) => {}
            Err(e) => {
                error!("Conversation start failed: {}", e);
                // Conversation failures read like an assistant message.
                println!("assistent> {}", e.user_message());
                return;
            }
        }
        if let Some(key) = self.conversation_key() {
            render_log(&self.assistant.state().messages(&key));
        }
    }

    async fn send_message(&self, text: &str) {
        let Some(key) = self.conversation_key() else {
            banner("Bitte zuerst mit /open einen Abschnitt öffnen.");
            return;
        };
        match self.assistant.send_message(&key, text).await {
            Ok(()) => {
                let log = self.assistant.state().messages(&key);
                render_log(&log[log.len().saturating_sub(2)..]);
            }
            Err(e) => println!("assistent> {}", e.user_message()),
        }
    }

    async fn save_subsection(&self, content: &str, approve: bool) {
        let Some(key) = self.conversation_key() else {
            banner("Bitte zuerst mit /open einen Abschnitt öffnen.");
            return;
        };
        match self.assistant.save_subsection(&key, content, approve).await {
            Ok(()) if approve => println!("Abschnitt gespeichert und freigegeben."),
            Ok(()) => println!("Abschnitt gespeichert."),
            Err(e) => println!("assistent> {}", e.user_message()),
        }
    }

    // --- Files ---

    async fn attach_file(&self, path: &str, message: Option<&str>) {
        let Some(key) = self.conversation_key() else {
            banner("Bitte zuerst mit /open einen Abschnitt öffnen.");
            return;
        };
        let Some(payload) = read_payload(path) else {
            banner("Datei konnte nicht gelesen werden.");
            return;
        };
        match self.assistant.attach_file(&key, &payload, message).await {
            Ok(file) => println!("Hochgeladen: {} ({})", file.original_filename, file.id),
            // The selection is not cleared: the same /attach can be retried.
            Err(e) => banner(&e.user_message()),
        }
    }

    async fn upload_file(&self, path: &str, section: Option<&str>, subsection: Option<&str>) {
        let Some(document_id) = self.current_document_id() else {
            banner("Für dieses Projekt existiert noch kein Dokument.");
            return;
        };
        let Some(payload) = read_payload(path) else {
            banner("Datei konnte nicht gelesen werden.");
            return;
        };
        match self
            .assistant
            .upload_document_file(&document_id, &payload, section, subsection, true)
            .await
        {
            Ok(file) => println!("Hochgeladen: {} ({})", file.original_filename, file.id),
            Err(e) => banner(&e.user_message()),
        }
    }

    async fn list_files(&self) {
        let Some(document_id) = self.current_document_id() else {
            banner("Für dieses Projekt existiert noch kein Dokument.");
            return;
        };
        match self.assistant.uploads().list_files(&document_id, false).await {
            Ok(files) => {
                for file in files {
                    println!(
                        "  {}  {}  {} Bytes  {:?}{}",
                        file.id,
                        file.original_filename,
                        file.file_size,
                        file.status,
                        file.error_message
                            .map(|m| format!("  ({})", m))
                            .unwrap_or_default()
                    );
                }
            }
            Err(e) => {
                error!("Listing files failed: {}", e);
                banner("Dateiliste konnte nicht geladen werden.");
            }
        }
    }

    async fn file_status(&self, file_id: &str) {
        match self.assistant.uploads().file_status(file_id).await {
            Ok(file) => println!("{}: {:?}", file.original_filename, file.status),
            Err(e) => {
                error!("File status failed: {}", e);
                banner("Dateistatus konnte nicht abgefragt werden.");
            }
        }
    }

    async fn delete_file(&self, file_id: &str) {
        let Some(document_id) = self.current_document_id() else {
            banner("Für dieses Projekt existiert noch kein Dokument.");
            return;
        };
        match self
            .assistant
            .uploads()
            .delete_file(&document_id, file_id)
            .await
        {
            Ok(()) => println!("Datei gelöscht."),
            Err(e) => {
                error!("Deleting file failed: {}", e);
                banner("Datei konnte nicht gelöscht werden.");
            }
        }
    }

    // --- PDF ---

    async fn refresh_pdf(&self) {
        let Some(document_id) = self.current_document_id() else {
            banner("Für dieses Projekt existiert noch kein Dokument.");
            return;
        };
        match self.assistant.refresh_pdf(&document_id).await {
            Ok(_) => {
                if let Some(handle) = self.assistant.state().preview(&document_id) {
                    println!("Vorschau: {}", handle.id);
                }
            }
            Err(e) => banner(&e.user_message()),
        }
    }

    async fn download(&self, path: &str) {
        let Some(document_id) = self.current_document_id() else {
            banner("Für dieses Projekt existiert noch kein Dokument.");
            return;
        };
        match self.assistant.download_pdf(&document_id).await {
            Ok(bytes) => match std::fs::write(path, bytes) {
                Ok(()) => println!("Gespeichert unter {}", path),
                Err(e) => {
                    error!("Writing download failed: {}", e);
                    banner("Datei konnte nicht geschrieben werden.");
                }
            },
            Err(e) => banner(&e.user_message()),
        }
    }

    // --- Cover Page ---

    async fn show_cover_page(&self) {
        let Some(document_id) = self.current_document_id() else {
            banner("Für dieses Projekt existiert noch kein Dokument.");
            return;
        };
        let structure = match self.assistant.cover_page_structure(&document_id).await {
            Ok(structure) => structure,
            Err(e) => {
                banner(&e.user_message());
                return;
            }
        };
        let data = match self.assistant.cover_page_data(&document_id).await {
            Ok(data) => data,
            Err(e) => {
                banner(&e.user_message());
                return;
            }
        };
        for field in structure {
            let value = data.get(&field.key).cloned().unwrap_or_default();
            println!("  {} ({:?}): {}", field.label, field.kind, value);
        }
    }

    async fn set_cover_field(&self, key: &str, value: &str) {
        let Some(document_id) = self.current_document_id() else {
            banner("Für dieses Projekt existiert noch kein Dokument.");
            return;
        };
        let mut data = match self.assistant.cover_page_data(&document_id).await {
            Ok(data) => data,
            Err(e) => {
                banner(&e.user_message());
                return;
            }
        };
        data.insert(key.to_string(), value.to_string());
        match self.assistant.save_cover_page_data(&document_id, &data).await {
            Ok(()) => println!("Deckblatt aktualisiert."),
            Err(e) => banner(&e.user_message()),
        }
    }

    // --- Rendering ---

    fn print_sections(&self) {
        println!("{}", self.topic);
        let document_id = self.current_document_id();
        for section in taxonomy::sections(self.topic) {
            println!("  {} – {}", section.id, section.title);
            for subsection in section.subsections {
                let marker = document_id
                    .as_ref()
                    .map(|doc| {
                        let key =
                            ConversationKey::new(doc.clone(), section.id, subsection.id);
                        let status = self.assistant.state().status(&key);
                        match (status.has_conversation, status.approved) {
                            (_, true) => "✓",
                            (true, false) => "…",
                            (false, false) => " ",
                        }
                    })
                    .unwrap_or(" ");
                println!("    [{}] {} – {}", marker, subsection.id, subsection.title);
            }
        }
    }
}

fn render_log(entries: &[ConversationEntry]) {
    for entry in entries {
        let speaker = match entry.role {
            Role::User => "sie",
            Role::Assistant => "assistent",
        };
        println!("{}> {}", speaker, entry.content);
    }
}

fn read_payload(path: &str) -> Option<FilePayload> {
    let bytes = std::fs::read(path).ok()?;
    let file_name = std::path::Path::new(path)
        .file_name()?
        .to_string_lossy()
        .to_string();
    Some(FilePayload {
        file_name,
        // Validation falls back to the file extension.
        mime_type: None,
        bytes,
    })
}

fn banner(message: &str) {
    println!("! {}", message);
}

fn print_help() {
    println!("  /login <email> <passwort>      anmelden");
    println!("  /register <email> <passwort>   Konto anlegen");
    println!("  /projects                      Projekte auflisten");
    println!("  /project new <name>            Projekt anlegen");
    println!("  /project del <id>              Projekt löschen");
    println!("  /use <projekt-id>              Projekt wählen");
    println!("  /topic <berichtsart>           Berichtsart wählen");
    println!("  /sections                      Struktur und Status anzeigen");
    println!("  /open <abschnitt> <unterpunkt> Konversation öffnen/starten");
    println!("  <text>                         Nachricht senden");
    println!("  /save <text>                   Inhalt speichern");
    println!("  /approve <text>                Inhalt speichern und freigeben");
    println!("  /attach <pfad> [nachricht]     Datei im Chat anhängen (max. 10 MB)");
    println!("  /upload <pfad> [abschnitt unterpunkt]  Datei hochladen (max. 25 MB)");
    println!("  /files /filestatus /delete     Dateiverwaltung");
    println!("  /pdf                           Vorschau aktualisieren");
    println!("  /download <pfad>               PDF herunterladen");
    println!("  /cover [set <feld> <wert>]     Deckblatt anzeigen/ändern");
    println!("  /reset /logout /quit");
}
