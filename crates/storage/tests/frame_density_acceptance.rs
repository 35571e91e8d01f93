use sequencer::is_dense;
use shared::domain::FrameId;
use storage::{NewProject, Storage, StoredFrame};

fn assert_dense(frames: &[StoredFrame]) {
    assert!(
        is_dense(frames.iter().map(|frame| frame.index)),
        "indices not dense: {:?}",
        frames.iter().map(|frame| frame.index).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn indices_stay_dense_across_mixed_edits() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let owner = storage.create_user("density").await.expect("user");
    let project = storage
        .create_project(
            owner,
            &NewProject {
                title: "Density".into(),
                description: String::new(),
                width: 320,
                height: 240,
                fps: 12,
            },
        )
        .await
        .expect("project")
        .project
        .project_id;

    for step in 0..12_i64 {
        let frames = match step % 4 {
            0 | 1 => {
                let duplicate = (step % 3 == 0).then_some(1);
                storage
                    .create_frame(project, duplicate)
                    .await
                    .expect("create")
                    .frames
            }
            2 => {
                let current = storage.list_frames(project).await.expect("frames");
                let mut reversed: Vec<FrameId> =
                    current.iter().map(|frame| frame.frame_id).collect();
                reversed.reverse();
                let frames = storage
                    .reorder_frames(project, &reversed)
                    .await
                    .expect("reorder");
                let got: Vec<FrameId> = frames.iter().map(|frame| frame.frame_id).collect();
                assert_eq!(got, reversed);
                frames
            }
            _ => {
                let current = storage.list_frames(project).await.expect("frames");
                let middle = (current.len() as i64 + 1) / 2;
                storage
                    .delete_frame(project, middle)
                    .await
                    .expect("delete")
                    .expect("frame exists")
                    .frames
            }
        };
        assert_dense(&frames);
        assert_dense(&storage.list_frames(project).await.expect("frames"));
    }
}

#[tokio::test]
async fn repeated_reorder_is_stable() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let owner = storage.create_user("stable").await.expect("user");
    let project = storage
        .create_project(
            owner,
            &NewProject {
                title: "Stable".into(),
                description: String::new(),
                width: 320,
                height: 240,
                fps: 12,
            },
        )
        .await
        .expect("project")
        .project
        .project_id;
    for _ in 0..4 {
        storage.create_frame(project, None).await.expect("frame");
    }

    let current = storage.list_frames(project).await.expect("frames");
    let request = vec![
        current[2].frame_id,
        current[4].frame_id,
        current[0].frame_id,
    ];

    let first = storage
        .reorder_frames(project, &request)
        .await
        .expect("reorder");
    let second = storage
        .reorder_frames(project, &request)
        .await
        .expect("reorder");

    let summarize = |frames: &[StoredFrame]| -> Vec<(FrameId, i64)> {
        frames
            .iter()
            .map(|frame| (frame.frame_id, frame.index))
            .collect()
    };
    assert_eq!(summarize(&first), summarize(&second));
    assert_eq!(
        first.iter().map(|f| f.frame_id).collect::<Vec<_>>(),
        vec![
            current[2].frame_id,
            current[4].frame_id,
            current[0].frame_id,
            current[1].frame_id,
            current[3].frame_id,
        ]
    );
}
