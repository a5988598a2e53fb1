mod dialog;

pub use dialog::{layout_source, AskDialog};

use anyhow::Result;
use gtk4::prelude::*;
use gtk4::{self, glib};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{error, info};

use crate::config::Config;
use crate::engine::{listener_channel, Engine};
use crate::messages::GuiMsg;

/// Engine spawned for the dialog, joined once GTK's main loop returns.
struct EngineTask {
    handle: tokio::task::JoinHandle<()>,
    gui_tx: async_channel::Sender<GuiMsg>,
}

pub fn run_gui(config: Config) -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create tokio runtime: {}", e))?;

    let application = gtk4::Application::builder()
        .application_id("io.github.mygemini.Mygemini")
        .build();

    let engine_task: Rc<RefCell<Option<EngineTask>>> = Rc::new(RefCell::new(None));

    let config_clone = config.clone();
    let handle = rt.handle().clone();
    let task_slot = engine_task.clone();

    application.connect_activate(move |app| {
        if task_slot.borrow().is_some() {
            app.active_window().into_iter().for_each(|w| w.present());
            return;
        }
        match setup_gui(app, config_clone.clone(), &handle) {
            Ok(task) => *task_slot.borrow_mut() = Some(task),
            Err(e) => {
                error!("Failed to setup GUI: {:#}", e);
                app.quit();
            }
        }
    });

    application.run_with_args::<String>(&[]);

    // Let queued speech finish before the process exits.
    if let Some(task) = engine_task.borrow_mut().take() {
        let _ = task.gui_tx.try_send(GuiMsg::Quit);
        info!("Waiting for the engine to shut down");
        if let Err(e) = rt.block_on(task.handle) {
            error!("Engine task failed: {}", e);
        }
    }

    Ok(())
}

fn setup_gui(
    app: &gtk4::Application,
    config: Config,
    rt: &tokio::runtime::Handle,
) -> Result<EngineTask> {
    let dialog = AskDialog::load(app, &config.ui, &config.gemini.model)?;

    // engine -> dialog, and dialog -> engine
    let (engine_tx, engine_rx) = listener_channel();
    let (gui_tx, gui_rx) = async_channel::unbounded::<GuiMsg>();

    let engine = Engine::new(config.clone())?.with_channels(gui_rx, vec![engine_tx]);
    dialog.show_greeting(engine.archive_enabled());

    let handle = rt.spawn(async move {
        if let Err(e) = engine.run().await {
            error!("Engine error: {}", e);
        }
    });

    let submit_tx = gui_tx.clone();
    dialog.connect_submit(move |question| {
        info!("Question submitted");
        if submit_tx.try_send(GuiMsg::Ask(question)).is_err() {
            error!("Engine is not accepting questions");
        }
    });

    let dialog_for_engine = dialog.clone();
    let app_for_quit = app.clone();
    glib::spawn_future_local(async move {
        while let Ok(msg) = engine_rx.recv().await {
            dialog_for_engine.apply(&msg);
        }
        info!("Engine channel closed, quitting application");
        app_for_quit.quit();
    });

    let gui_tx_close = gui_tx.clone();
    dialog.window().connect_close_request(move |_| {
        let _ = gui_tx_close.try_send(GuiMsg::Quit);
        glib::Propagation::Proceed
    });

    dialog.present();

    Ok(EngineTask { handle, gui_tx })
}
